//! MCP server implementation with tool handlers
//!
//! Registers the email tools on an rmcp router. Every tool answers with a
//! [`ToolResponse`]; business failures become `success=false` results and
//! never MCP protocol errors.

use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};
use schemars::JsonSchema;

use crate::compose::{self, ComposeRequest, ForwardOptions, ReplyOptions};
use crate::config::ServerConfig;
use crate::criteria;
use crate::deadline::{fetch_timeout_message, folder_list_timeout_message, with_deadline};
use crate::errors::{AppError, AppResult};
use crate::fetch::{self, FetchOptions};
use crate::folders;
use crate::imap;
use crate::mailbox::release;
use crate::models::{
    AccountInfo, AccountsData, FindData, FindEmailsInput, FoldersData, ListFoldersInput, Meta,
    ModifyData, ModifyEmailsInput, RespondData, RespondEmailInput, ResponseType, SendData,
    SendEmailInput, ToolPayload, ToolResponse,
};
use crate::mutate::{self, MutationRequest};
use crate::smtp::SmtpDelivery;

/// Folder used when the caller names none
const DEFAULT_FOLDER: &str = "INBOX";
/// Upper bound for `emails_find.limit`
const MAX_FIND_LIMIT: usize = 100;

/// Email MCP server
///
/// Holds the read-only account configuration and the SMTP delivery
/// transport. Each tool call opens and closes its own mailbox session.
#[derive(Clone)]
pub struct EmailServer {
    config: Arc<ServerConfig>,
    delivery: SmtpDelivery,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl EmailServer {
    pub fn new(config: ServerConfig) -> Self {
        let delivery = SmtpDelivery::new(config.smtp_timeout());
        Self {
            config: Arc::new(config),
            delivery,
            tool_router: Self::tool_router(),
        }
    }

    /// Tool: search a folder and optionally return bodies and attachments
    #[tool(
        name = "emails_find",
        description = "Search for emails with flexible filters. Optionally include full content and base64 attachments. Use this to find specific emails, check for unread messages, or browse a folder."
    )]
    async fn find_emails(
        &self,
        Parameters(input): Parameters<FindEmailsInput>,
    ) -> Result<Json<ToolResponse<FindData>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.find_emails_impl(input).await)
    }

    /// Tool: change read/flag state or move emails between folders
    #[tool(
        name = "emails_modify",
        description = "Mark emails read/unread, flag/unflag them, or move them to another folder. Ids are processed one at a time; failures are reported per id."
    )]
    async fn modify_emails(
        &self,
        Parameters(input): Parameters<ModifyEmailsInput>,
    ) -> Result<Json<ToolResponse<ModifyData>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.modify_emails_impl(input).await)
    }

    /// Tool: send a new email through the account's SMTP relay
    #[tool(
        name = "email_send",
        description = "Send a new email with plain text or HTML body, CC/BCC and base64 file attachments."
    )]
    async fn send_email(
        &self,
        Parameters(input): Parameters<SendEmailInput>,
    ) -> Result<Json<ToolResponse<SendData>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.send_email_impl(input).await)
    }

    /// Tool: reply, reply to all, or forward an existing email
    #[tool(
        name = "email_respond",
        description = "Reply to or forward an existing email. 'reply' answers the sender, 'reply_all' all recipients, 'forward' sends to new recipients given in 'to'."
    )]
    async fn respond_email(
        &self,
        Parameters(input): Parameters<RespondEmailInput>,
    ) -> Result<Json<ToolResponse<RespondData>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.respond_email_impl(input).await)
    }

    /// Tool: list folders, optionally with message counts
    #[tool(
        name = "folders_list",
        description = "List all email folders/labels. Folder paths can be used as move targets in emails_modify."
    )]
    async fn list_folders(
        &self,
        Parameters(input): Parameters<ListFoldersInput>,
    ) -> Result<Json<ToolResponse<FoldersData>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.list_folders_impl(input).await)
    }

    /// Tool: list configured accounts without credentials
    #[tool(
        name = "accounts_list",
        description = "List configured email accounts and the default account"
    )]
    async fn list_accounts(&self) -> Result<Json<ToolResponse<AccountsData>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, Ok(account_summaries(&self.config)))
    }
}

/// MCP server handler implementation
#[tool_handler(router = self.tool_router)]
impl ServerHandler for EmailServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_instructions(
                "Email server for IMAP search and organisation plus SMTP send, reply and forward. Use emails_find ids with emails_modify and email_respond; folders_list paths are valid move targets.",
            )
    }
}

/// Tool implementation methods
impl EmailServer {
    async fn find_emails_impl(&self, input: FindEmailsInput) -> AppResult<FindData> {
        validate_limit(input.limit)?;
        let folder = resolve_folder(input.folder.as_deref())?;
        let criteria =
            criteria::translate(input.filters.as_ref())?.with_text(input.query.as_deref())?;
        let account = self.config.resolve_account(input.account_name.as_deref())?;
        let options = FetchOptions {
            limit: input.limit,
            include_content: input.include_content,
            include_attachments: input.include_attachments,
        };

        let mut client = imap::connect_authenticated(&self.config, account).await?;
        let limit = self.config.fetch_timeout();
        let outcome = with_deadline(
            limit,
            &fetch_timeout_message(limit),
            fetch::fetch(&mut client, folder, &criteria, options),
        )
        .await;
        let emails = release(&mut client, outcome).await?;

        Ok(FindData {
            account: account.name.clone(),
            count: emails.len(),
            emails,
        })
    }

    async fn modify_emails_impl(&self, input: ModifyEmailsInput) -> AppResult<ModifyData> {
        if input.email_ids.is_empty() {
            return Err(AppError::invalid(
                "email_ids is required and must not be empty",
            ));
        }
        let folder = resolve_folder(input.folder.as_deref())?;
        if let Some(target) = &input.move_to_folder {
            validate_folder(target, "move_to_folder")?;
        }
        let account = self.config.resolve_account(input.account_name.as_deref())?;
        let request = MutationRequest {
            mark_read: input.mark_read,
            mark_unread: input.mark_unread,
            flag: input.flag,
            unflag: input.unflag,
            move_to_folder: input.move_to_folder,
        };

        let mut client = imap::connect_authenticated(&self.config, account).await?;
        let outcome = mutate::apply(&mut client, folder, &input.email_ids, &request).await;
        let report = release(&mut client, outcome).await?;

        Ok(ModifyData {
            account: account.name.clone(),
            modified: report.modified,
            total: input.email_ids.len(),
            errors: (!report.is_success()).then_some(report.errors),
        })
    }

    async fn send_email_impl(&self, input: SendEmailInput) -> AppResult<SendData> {
        let account = self.config.resolve_account(input.account_name.as_deref())?;
        let request = ComposeRequest {
            to: input.to.clone(),
            subject: input.subject.clone(),
            body: input.body,
            body_type: input.body_type,
            cc: input.cc,
            bcc: input.bcc,
            attachments: input.attachments,
            from_name: account.default_from_name.clone(),
        };
        let receipt = compose::send(&self.delivery, account, request).await?;
        if !receipt.success {
            tracing::warn!(account = %account.name, "relay accepted message without a Message-ID");
        }

        Ok(SendData {
            account: account.name.clone(),
            message_id: receipt.message_id,
            to: input.to,
            subject: input.subject,
        })
    }

    async fn respond_email_impl(&self, input: RespondEmailInput) -> AppResult<RespondData> {
        if input.email_id.trim().is_empty() {
            return Err(AppError::invalid("email_id is required"));
        }
        if input.body.trim().is_empty() {
            return Err(AppError::invalid("body is required"));
        }
        if input.response_type == ResponseType::Forward
            && input.to.iter().all(|t| t.trim().is_empty())
        {
            return Err(AppError::invalid("to is required for forward"));
        }
        let folder = resolve_folder(input.folder.as_deref())?;
        let account = self.config.resolve_account(input.account_name.as_deref())?;

        let mut client = imap::connect_authenticated(&self.config, account).await?;
        let limit = self.config.fetch_timeout();
        let outcome = with_deadline(
            limit,
            &fetch_timeout_message(limit),
            compose::load_original(
                &mut client,
                folder,
                &input.email_id,
                input.include_attachments,
            ),
        )
        .await;
        let original = release(&mut client, outcome).await?;

        let request = match input.response_type {
            ResponseType::Forward => compose::build_forward(
                account,
                &original,
                ForwardOptions {
                    to: input.to,
                    body: input.body,
                    body_type: input.body_type,
                    include_original: input.include_original,
                    include_attachments: input.include_attachments,
                    additional_attachments: input.additional_attachments,
                },
            )?,
            ResponseType::Reply | ResponseType::ReplyAll => compose::build_reply(
                account,
                &original,
                ReplyOptions {
                    body: input.body,
                    body_type: input.body_type,
                    reply_all: input.response_type == ResponseType::ReplyAll,
                    include_original: input.include_original,
                    include_attachments: input.include_attachments,
                    additional_attachments: input.additional_attachments,
                    to: input.to,
                },
            )?,
        };
        let receipt = compose::send(&self.delivery, account, request).await?;

        Ok(RespondData {
            account: account.name.clone(),
            message_id: receipt.message_id,
            response_type: input.response_type,
            original_email_id: input.email_id,
        })
    }

    async fn list_folders_impl(&self, input: ListFoldersInput) -> AppResult<FoldersData> {
        let account = self.config.resolve_account(input.account_name.as_deref())?;

        let mut client = imap::connect_authenticated(&self.config, account).await?;
        let limit = self.config.folder_list_timeout();
        let outcome = with_deadline(
            limit,
            &folder_list_timeout_message(limit),
            folders::list(&mut client, input.include_counts),
        )
        .await;
        let folders = release(&mut client, outcome).await?;

        Ok(FoldersData {
            account: account.name.clone(),
            count: folders.len(),
            folders,
        })
    }
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build the tool result from business logic output
///
/// Errors are folded into a failed result so the caller always receives a
/// well-formed response.
fn finalize_tool<T>(
    started: Instant,
    result: AppResult<T>,
) -> Result<Json<ToolResponse<T>>, ErrorData>
where
    T: ToolPayload + JsonSchema,
{
    let meta = Meta::now(duration_ms(started));
    match result {
        Ok(data) => Ok(Json(ToolResponse {
            success: data.is_success(),
            data: Some(data),
            error: None,
            meta,
        })),
        Err(e) => {
            tracing::warn!(error = %e, duration_ms = meta.duration_ms, "tool call failed");
            Ok(Json(ToolResponse {
                success: false,
                data: None,
                error: Some(e.to_string()),
                meta,
            }))
        }
    }
}

fn account_summaries(config: &ServerConfig) -> AccountsData {
    let accounts = config
        .accounts
        .values()
        .map(|a| AccountInfo {
            name: a.name.clone(),
            imap_host: a.imap_host.clone(),
            imap_port: a.imap_port,
            imap_secure: a.imap_secure,
            smtp_host: a.smtp_host.clone(),
            smtp_port: a.smtp_port,
            smtp_secure: a.smtp_secure,
            is_default: a.name == config.default_account,
        })
        .collect::<Vec<_>>();
    AccountsData {
        default_account: config.default_account.clone(),
        count: accounts.len(),
        accounts,
    }
}

/// Validate `limit` bounds
fn validate_limit(limit: usize) -> AppResult<()> {
    if !(1..=MAX_FIND_LIMIT).contains(&limit) {
        return Err(AppError::invalid(format!(
            "limit must be in range 1..{MAX_FIND_LIMIT}"
        )));
    }
    Ok(())
}

/// Caller folder or `INBOX`
fn resolve_folder(folder: Option<&str>) -> AppResult<&str> {
    match folder.map(str::trim).filter(|f| !f.is_empty()) {
        Some(f) => {
            validate_folder(f, "folder")?;
            Ok(f)
        }
        None => Ok(DEFAULT_FOLDER),
    }
}

/// Validate folder name format
fn validate_folder(folder: &str, field: &str) -> AppResult<()> {
    if folder.is_empty() || folder.len() > 256 {
        return Err(AppError::invalid(format!(
            "{field} must be 1..256 characters"
        )));
    }
    if folder.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::invalid(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}
