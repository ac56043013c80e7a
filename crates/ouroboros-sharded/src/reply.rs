//! Reply error interpretation

use ouroboros_bson::{Bson, Document};

use crate::error::ReplyError;
use crate::message::Reply;

/// Error fields carried by a single-document reply
#[derive(Debug, Clone, PartialEq, Eq)]
struct ErrorFields {
    ok: Option<i32>,
    code: Option<i32>,
    message: Option<String>,
}

fn error_fields(doc: &Document) -> ErrorFields {
    let message = doc
        .get_str("$err")
        .or_else(|| doc.get_str("errmsg"))
        .map(str::to_string);
    // A non-numeric `ok` is treated as a failure
    let ok = doc.get("ok").map(|value| match value {
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => {
            value.as_integer().map_or(-1, |v| v as i32)
        }
        _ => -1,
    });
    let code = doc
        .get("code")
        .or_else(|| doc.get("assertionCode"))
        .and_then(Bson::as_integer)
        .map(|v| v as i32);
    ErrorFields { ok, code, message }
}

/// Interpret the embedded error of a single-document reply
///
/// An error exists when the document carries `$err` or `errmsg`, when `ok`
/// is present and not 1, or when `known_error` says the caller already
/// knows the reply failed. Replies with zero or several documents carry no
/// embedded error.
pub fn as_error(reply: &Reply, known_error: bool) -> Option<ReplyError> {
    let [doc] = reply.documents.as_slice() else {
        return None;
    };
    let fields = error_fields(doc);
    let failed = known_error || fields.message.is_some() || fields.ok.is_some_and(|ok| ok != 1);
    if !failed {
        return None;
    }
    let ok = fields.ok.unwrap_or(-1);
    Some(ReplyError::Reply {
        ok,
        code: fields.code,
        message: fields
            .message
            .unwrap_or_else(|| format!("Command failed (ok: {})", ok)),
    })
}

fn embedded_message(reply: &Reply, fallback: &str) -> String {
    match as_error(reply, true) {
        Some(ReplyError::Reply { message, .. }) => message,
        _ => fallback.to_string(),
    }
}

/// Check a reply's flags and embedded error
///
/// Flags win over the document: cursor-not-found, then query-failure, then
/// shard-config-stale. Without a flag the document is inspected.
pub fn check_reply(reply: &Reply) -> Result<(), ReplyError> {
    if reply.is_cursor_not_found() {
        return Err(ReplyError::CursorNotFound);
    }
    if reply.is_query_failed() {
        return Err(ReplyError::QueryFailed(embedded_message(reply, "Query failed")));
    }
    if reply.is_shard_config_stale() {
        return Err(ReplyError::ShardConfigStale(embedded_message(
            reply,
            "Shard configuration is stale",
        )));
    }
    match as_error(reply, false) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::response_flags;
    use ouroboros_bson::{DocumentBuilder, Element};

    fn reply_with(doc: Document, flags: i32) -> Reply {
        Reply::new(0, vec![doc]).with_flags(flags)
    }

    fn doc(elements: Vec<Element>) -> Document {
        Document::from_elements(elements)
    }

    #[test]
    fn test_empty_document_not_known_is_ok() {
        let reply = reply_with(Document::new(), 0);
        assert_eq!(as_error(&reply, false), None);
        assert!(check_reply(&reply).is_ok());
    }

    #[test]
    fn test_dollar_err_with_stale_flag() {
        let reply = reply_with(
            doc(vec![Element::new("$err", "This is an error.")]),
            response_flags::SHARD_CONFIG_STALE,
        );
        match check_reply(&reply) {
            Err(ReplyError::ShardConfigStale(message)) => {
                assert!(message.contains("This is an error."))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_errmsg_with_stale_flag() {
        let reply = reply_with(
            doc(vec![Element::new("errmsg", "This is an error.")]),
            response_flags::SHARD_CONFIG_STALE,
        );
        assert!(matches!(
            check_reply(&reply),
            Err(ReplyError::ShardConfigStale(m)) if m.contains("This is an error.")
        ));
    }

    #[test]
    fn test_numeric_ok_value() {
        let reply = reply_with(doc(vec![Element::new("ok", -23)]), 0);
        match as_error(&reply, true) {
            Some(ReplyError::Reply { ok, .. }) => assert_eq!(ok, -23),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_string_ok_counts_as_failure() {
        let reply = reply_with(doc(vec![Element::new("ok", "0")]), 0);
        match as_error(&reply, true) {
            Some(ReplyError::Reply { ok, .. }) => assert_eq!(ok, -1),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_ok_one_not_known_is_ok() {
        let reply = reply_with(doc(vec![Element::new("ok", 1)]), 0);
        assert_eq!(as_error(&reply, false), None);

        let reply = reply_with(doc(vec![Element::new("ok", 1.0)]), 0);
        assert!(check_reply(&reply).is_ok());
    }

    #[test]
    fn test_ok_zero_with_code() {
        let mut builder = DocumentBuilder::new();
        builder
            .add("ok", 0.0)
            .add("errmsg", "not authorized")
            .add("code", 13);
        let reply = reply_with(builder.build(), 0);
        assert_eq!(
            check_reply(&reply),
            Err(ReplyError::Reply {
                ok: 0,
                code: Some(13),
                message: "not authorized".into()
            })
        );
    }

    #[test]
    fn test_assertion_code_fallback() {
        let reply = reply_with(
            doc(vec![
                Element::new("$err", "assertion"),
                Element::new("assertionCode", 10057i64),
            ]),
            0,
        );
        assert!(matches!(
            as_error(&reply, false),
            Some(ReplyError::Reply { code: Some(10057), .. })
        ));
    }

    #[test]
    fn test_flag_precedence() {
        let empty = Reply::new(0, Vec::new());
        assert_eq!(
            check_reply(&empty.clone().with_flags(response_flags::CURSOR_NOT_FOUND)),
            Err(ReplyError::CursorNotFound)
        );
        assert_eq!(
            check_reply(&empty.clone().with_flags(response_flags::QUERY_FAILURE)),
            Err(ReplyError::QueryFailed("Query failed".into()))
        );
        assert!(matches!(
            check_reply(&empty.with_flags(response_flags::SHARD_CONFIG_STALE)),
            Err(ReplyError::ShardConfigStale(_))
        ));
    }

    #[test]
    fn test_multi_document_reply_has_no_embedded_error() {
        let reply = Reply::new(
            0,
            vec![
                doc(vec![Element::new("$err", "ignored")]),
                Document::new(),
            ],
        );
        assert!(check_reply(&reply).is_ok());
    }
}
