//! Internal module for decoding fetched message sections.
//!
//! Both functions are lenient: a section that fails to parse is logged and
//! returned as lossy UTF-8 text, so one malformed message never aborts a scan.

use mailparse::{parse_headers, parse_mail, MailHeaderMap};
use tracing::warn;

/// Extracts the decoded `Subject` value from a raw header block.
///
/// A header block without a subject yields an empty string.
pub(crate) fn subject_from_header(uid: u32, raw: &[u8]) -> String {
    match parse_headers(raw) {
        Ok((headers, _)) => headers.get_first_value("Subject").unwrap_or_default(),
        Err(e) => {
            warn!(uid, error = %e, "Failed to parse headers, using raw text");
            String::from_utf8_lossy(raw).into_owned()
        }
    }
}

/// Extracts the readable text of a raw RFC 822 message.
pub(crate) fn body_text(uid: u32, raw: &[u8]) -> String {
    let parsed = match parse_mail(raw) {
        Ok(p) => p,
        Err(e) => {
            warn!(uid, error = %e, "Failed to parse email, using raw text");
            return String::from_utf8_lossy(raw).into_owned();
        }
    };

    match extract_body_text(&parsed) {
        Ok(text) => text,
        Err(e) => {
            warn!(uid, error = %e, "Failed to extract body from email, using raw text");
            String::from_utf8_lossy(raw).into_owned()
        }
    }
}

/// Extracts text content from a parsed email, handling multipart messages.
fn extract_body_text(
    parsed: &mailparse::ParsedMail<'_>,
) -> Result<String, mailparse::MailParseError> {
    if !parsed.subparts.is_empty() {
        // text/plain first, then text/html
        for wanted in ["text/plain", "text/html"] {
            let part = parsed
                .subparts
                .iter()
                .find(|part| part.ctype.mimetype.eq_ignore_ascii_case(wanted));
            if let Some(Ok(body)) = part.map(mailparse::ParsedMail::get_body) {
                return Ok(body);
            }
        }

        if let Some(first_part) = parsed.subparts.first() {
            return extract_body_text(first_part);
        }
    }

    parsed.get_body()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_from_header() {
        let raw = b"From: Verisure <noreply@verisure.nl>\r\nSubject: Systeem ingeschakeld\r\n\r\n";
        assert_eq!(subject_from_header(1, raw), "Systeem ingeschakeld");
    }

    #[test]
    fn test_subject_encoded_word_is_decoded() {
        let raw = b"Subject: =?UTF-8?Q?Gedeeltelijk_ingeschakeld?=\r\n\r\n";
        assert_eq!(subject_from_header(1, raw), "Gedeeltelijk ingeschakeld");
    }

    #[test]
    fn test_missing_subject_is_empty() {
        let raw = b"From: someone@example.com\r\n\r\n";
        assert_eq!(subject_from_header(1, raw), "");
    }

    #[test]
    fn test_body_text_simple() {
        let raw = b"From: noreply@verisure.nl\r\nSubject: Systeem ingeschakeld\r\n\r\n\
Het systeem Bongerd 36 werd ingeschakeld met een Starkey door R. Doorn.\r\n";
        let text = body_text(1, raw);
        assert!(text.contains("door R. Doorn."));
    }

    #[test]
    fn test_body_text_prefers_plain_part() {
        let raw = b"From: noreply@verisure.nl\r\n\
Content-Type: multipart/alternative; boundary=\"XX\"\r\n\r\n\
--XX\r\nContent-Type: text/html\r\n\r\n<p>html part</p>\r\n\
--XX\r\nContent-Type: text/plain\r\n\r\nplain part\r\n\
--XX--\r\n";
        let text = body_text(1, raw);
        assert!(text.contains("plain part"));
        assert!(!text.contains("html part"));
    }
}
