use std::time::Instant;

use html2text::from_read;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::{AttributeSource, IndexerCore, MailAttribute, TokenMap};
use crate::types::{Mail, MailAddress, MailBody, MailFile};

/// Assembles the attribute sources for one mail and runs them through the
/// core tokenizer. The time spent tokenizing is charged to the core's
/// indexing-time counter.
pub fn create_mail_index_entries(
    core: &dyn IndexerCore,
    mail: &Mail,
    body: &MailBody,
    files: &[MailFile],
) -> TokenMap {
    let start = Instant::now();

    let subject = mail.subject.clone();
    let to = join_addresses(&mail.to_recipients);
    let cc = join_addresses(&mail.cc_recipients);
    let bcc = join_addresses(&mail.bcc_recipients);
    let sender = mail
        .sender
        .as_ref()
        .map(format_address)
        .unwrap_or_default();
    let body_text = body.text.clone();
    let file_names = files
        .iter()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let attributes = vec![
        AttributeSource::new(MailAttribute::Subject, move || subject.clone()),
        AttributeSource::new(MailAttribute::ToRecipients, move || to.clone()),
        AttributeSource::new(MailAttribute::CcRecipients, move || cc.clone()),
        AttributeSource::new(MailAttribute::BccRecipients, move || bcc.clone()),
        AttributeSource::new(MailAttribute::Sender, move || sender.clone()),
        AttributeSource::new(MailAttribute::Body, move || body_to_plain(&body_text)),
        AttributeSource::new(MailAttribute::Attachments, move || file_names.clone()),
    ];

    let entries = core.create_index_entries(mail.id.element_id, attributes);
    core.note_indexing_time(start.elapsed());
    entries
}

fn format_address(addr: &MailAddress) -> String {
    format!("{} <{}>", addr.name, addr.address)
}

fn join_addresses(addrs: &[MailAddress]) -> String {
    addrs
        .iter()
        .map(format_address)
        .collect::<Vec<_>>()
        .join(",")
}

/// Body blobs are HTML more often than not; strip markup before handing the
/// text to the tokenizer. Plain text passes through untouched apart from
/// whitespace normalization.
pub fn body_to_plain(text: &str) -> String {
    if looks_like_html(text) {
        collapse_whitespace(&from_read(text.as_bytes(), 80).unwrap_or_default())
    } else {
        collapse_whitespace(text)
    }
}

fn looks_like_html(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    if lower.contains("<html")
        || lower.contains("<body")
        || lower.contains("<div")
        || lower.contains("<span")
        || lower.contains("<p")
        || lower.contains("<table")
        || lower.contains("<br")
        || lower.contains("</")
    {
        return true;
    }

    let angle_count = body.as_bytes().iter().filter(|b| **b == b'<').count();
    angle_count > 5
}

fn collapse_whitespace(text: &str) -> String {
    static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
    WS_RE.replace_all(text.trim(), " ").into_owned()
}
