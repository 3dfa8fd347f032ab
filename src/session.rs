//! Internal IMAP session management.
//!
//! This module wraps async-imap operations with proper error handling. Every
//! command's tagged completion is checked by async-imap; a `NO`/`BAD` answer
//! comes back as an error carrying the command's context.

use crate::connection::MailStream;
use crate::error::{Error, Result};
use async_imap::types::Fetch;
use async_imap::Session;
use futures::StreamExt;
use tracing::{debug, instrument};

/// Type alias for an IMAP session over the negotiated stream.
pub(crate) type ImapSession = Session<MailStream>;

/// Section requested for subject lookups.
pub(crate) const HEADER_SECTION: &str = "BODY.PEEK[HEADER]";

/// Section requested for body lookups.
pub(crate) const MESSAGE_SECTION: &str = "BODY.PEEK[]";

/// Authentication configuration for IMAP.
pub(crate) struct AuthConfig<'a> {
    pub login: &'a str,
    pub password: &'a str,
}

/// Authenticates to IMAP server and returns a session.
#[instrument(name = "session::authenticate", skip_all, fields(login = %config.login))]
pub(crate) async fn authenticate(
    stream: MailStream,
    config: &AuthConfig<'_>,
) -> Result<ImapSession> {
    let client = async_imap::Client::new(stream);

    debug!("Authenticating to IMAP server");

    client
        .login(config.login, config.password)
        .await
        .map_err(|e| Error::ImapLogin {
            login: config.login.to_string(),
            source: e.0,
        })
}

/// Announces the client identity when the server advertises `ID`.
///
/// Returns whether the identity was sent.
#[instrument(name = "session::identify", skip(session))]
pub(crate) async fn identify(
    session: &mut ImapSession,
) -> std::result::Result<bool, async_imap::error::Error> {
    let capabilities = session.capabilities().await?;
    if !capabilities.has_str("ID") {
        debug!("Server does not advertise ID");
        return Ok(false);
    }

    session
        .id([
            ("name", Some(env!("CARGO_PKG_NAME"))),
            ("version", Some(env!("CARGO_PKG_VERSION"))),
        ])
        .await?;

    Ok(true)
}

/// Selects the mailbox to watch.
#[instrument(name = "session::select", skip(session), fields(mailbox = %mailbox))]
pub(crate) async fn select_mailbox(session: &mut ImapSession, mailbox: &str) -> Result<()> {
    debug!("Selecting mailbox");

    session
        .select(mailbox)
        .await
        .map_err(|source| Error::SelectMailbox {
            mailbox: mailbox.to_string(),
            source,
        })?;

    Ok(())
}

/// Sends a NOOP, which also lets the server report new messages.
#[instrument(name = "session::noop", skip(session))]
pub(crate) async fn noop(session: &mut ImapSession) -> Result<()> {
    session
        .noop()
        .await
        .map_err(|source| Error::ImapNoop { source })
}

/// Searches UIDs of messages from `sender`, oldest first.
#[instrument(name = "session::search_from", skip(session), fields(sender = %sender))]
pub(crate) async fn search_from(session: &mut ImapSession, sender: &str) -> Result<Vec<u32>> {
    let query = format!("FROM {}", quote(sender));

    let uids = session
        .uid_search(&query)
        .await
        .map_err(|source| Error::ImapSearch {
            query: query.clone(),
            source,
        })?;

    // UIDs grow with arrival order; the server hands back an unordered set.
    let mut uids: Vec<u32> = uids.into_iter().collect();
    uids.sort_unstable();

    debug!(uid_count = uids.len(), "Found emails");

    Ok(uids)
}

/// Fetches the raw header block of one message.
pub(crate) async fn fetch_header(session: &mut ImapSession, uid: u32) -> Result<Vec<u8>> {
    fetch_section(session, uid, HEADER_SECTION, Fetch::header).await
}

/// Fetches the raw RFC 822 message.
pub(crate) async fn fetch_message(session: &mut ImapSession, uid: u32) -> Result<Vec<u8>> {
    fetch_section(session, uid, MESSAGE_SECTION, Fetch::body).await
}

#[instrument(name = "session::fetch", skip(session, extract))]
async fn fetch_section(
    session: &mut ImapSession,
    uid: u32,
    section: &'static str,
    extract: fn(&Fetch) -> Option<&[u8]>,
) -> Result<Vec<u8>> {
    let mut stream = session
        .uid_fetch(uid.to_string(), section)
        .await
        .map_err(|source| Error::ImapFetch {
            uid,
            section,
            source,
        })?
        .boxed();

    // Drain the whole response so the session stays in sync.
    let mut data = None;
    while let Some(item) = stream.next().await {
        let fetch = item.map_err(|source| Error::ImapFetch {
            uid,
            section,
            source,
        })?;
        if data.is_none() {
            data = extract(&fetch).map(<[u8]>::to_vec);
        }
    }

    data.ok_or(Error::MissingSection { uid, section })
}

/// Logs out from IMAP session.
#[instrument(name = "session::logout", skip(session))]
pub(crate) async fn logout(session: &mut ImapSession) -> Result<()> {
    debug!("Logging out");

    session
        .logout()
        .await
        .map_err(|source| Error::ImapLogout { source })
}

/// Renders `value` as an IMAP quoted string.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
