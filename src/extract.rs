/*!
 # Booking email extraction

 The booking system mails a daily schedule whose HTML body carries one
 600 pixel wide table with a white background. Each booking row holds the
 start time (`h:mm AM/PM`) in its second cell, the court in its third and
 the payment status in its fifth.

 Recurring bookings are excluded: they are lit by a separate standing
 arrangement. Rows that cannot be read are dropped one by one; only an
 email without any HTML body is an error.
*/

use chrono::NaiveTime;
use html_escape::decode_html_entities;
use mail_parser::{MessageParser, PartType};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument, trace, warn};

use crate::reservation::Reservations;
use crate::{Error, Result};

static TABLE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(/?)table\b([^>]*)>").expect("valid table regex"));
static ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr\s*>").expect("valid row regex"));
static CELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<td\b[^>]*>(.*?)</td\s*>").expect("valid cell regex"));
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));
static WIDTH_600: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bwidth\s*=\s*["']?600["']?(\s|$)"#).expect("valid width regex")
});
static STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)\bstyle\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid style regex")
});
static HEADER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]*:").expect("valid header regex"));

/// Style marker identifying the schedule table
const TABLE_BACKGROUND: &str = "background-color:#ffffff";

/// Status of bookings that must not drive the lights
const RECURRING_STATUS: &str = "recurring";

/// Extracts today's reservations from a booking email.
///
/// `content` may be a raw RFC 822 message (single part or multipart, 7bit,
/// quoted-printable or base64 encoded) or a bare HTML document.
#[instrument(skip(content), fields(len = content.len()))]
pub fn reservations_from_message(content: &str) -> Result<Reservations> {
    let html = if looks_like_message(content) {
        debug!("Parsing raw email message");
        find_html(content)?
            .ok_or_else(|| Error::Extraction("no HTML part in booking email".to_string()))?
    } else {
        content.to_string()
    };
    Ok(extract_reservations(&html))
}

/// Extracts reservations from the schedule table of an HTML document.
///
/// A document without the schedule table yields an empty mapping.
pub fn extract_reservations(html: &str) -> Reservations {
    let mut reservations = Reservations::new();

    let Some(table) = find_schedule_table(html) else {
        warn!("Booking table not found in email");
        return reservations;
    };

    for (index, row) in ROW.captures_iter(table).skip(1).enumerate() {
        let cells: Vec<String> = CELL
            .captures_iter(&row[1])
            .map(|cell| cell_text(&cell[1]))
            .collect();
        if cells.len() < 5 {
            trace!("Skipping row {} with {} cells", index + 1, cells.len());
            continue;
        }

        let time_slot = cells[1].as_str();
        let court = cells[2].trim_end_matches('.').trim();
        let payment_status = cells[4].as_str();

        if time_slot.is_empty() || !time_slot.contains(':') {
            trace!("Skipping row {} without a time slot", index + 1);
            continue;
        }

        let start = match convert_to_24hr(time_slot) {
            Some(start) => start,
            None => {
                warn!("Dropping row {}: unreadable time {:?}", index + 1, time_slot);
                continue;
            }
        };

        if payment_status.eq_ignore_ascii_case(RECURRING_STATUS) {
            debug!("Skipping recurring booking at {} for {}", start, court);
            continue;
        }

        let courts = reservations.entry(start).or_default();
        if !courts.iter().any(|c| c == court) {
            courts.push(court.to_string());
        }
    }

    debug!("Extracted {} reservation slots", reservations.len());
    reservations
}

/// Converts `h:mm AM/PM` to 24-hour `HH:MM`
fn convert_to_24hr(time_slot: &str) -> Option<String> {
    NaiveTime::parse_from_str(time_slot, "%I:%M %p")
        .ok()
        .map(|time| time.format("%H:%M").to_string())
}

/// Returns the inner HTML of the first table carrying the schedule markers
fn find_schedule_table(html: &str) -> Option<&str> {
    let tags: Vec<_> = TABLE_TAG.captures_iter(html).collect();

    for (open_index, open) in tags.iter().enumerate() {
        if !open[1].is_empty() || !is_schedule_table(&open[2]) {
            continue;
        }
        let body_start = open.get(0).map(|m| m.end())?;

        let mut depth = 0usize;
        for tag in &tags[open_index + 1..] {
            if tag[1].is_empty() {
                depth += 1;
            } else if depth == 0 {
                let body_end = tag.get(0).map(|m| m.start())?;
                return Some(&html[body_start..body_end]);
            } else {
                depth -= 1;
            }
        }
        // Unterminated table, take the rest of the document
        return Some(&html[body_start..]);
    }

    None
}

fn is_schedule_table(attributes: &str) -> bool {
    if !WIDTH_600.is_match(attributes) {
        return false;
    }
    STYLE.captures(attributes).is_some_and(|style| {
        let value = style.get(1).or_else(|| style.get(2)).map_or("", |m| m.as_str());
        let compact: String = value
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        compact.contains(TABLE_BACKGROUND)
    })
}

/// Visible text of a cell with tags removed, entities decoded and runs of
/// whitespace collapsed
fn cell_text(cell: &str) -> String {
    let text = TAG.replace_all(cell, " ");
    let text = decode_html_entities(&text);
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_message(content: &str) -> bool {
    let content = content.trim_start();
    !content.starts_with('<')
        && content
            .lines()
            .next()
            .is_some_and(|line| HEADER_LINE.is_match(line))
}

/// Body of the first `text/html` part of a raw message.
///
/// A single-part message is taken as is, whatever its declared type.
fn find_html(raw: &str) -> Result<Option<String>> {
    let message = MessageParser::default()
        .parse(raw.as_bytes())
        .ok_or_else(|| Error::Extraction("unreadable email message".to_string()))?;

    let html = message.parts.iter().find_map(|part| match &part.body {
        PartType::Html(html) => Some(html.to_string()),
        _ => None,
    });
    if html.is_some() {
        return Ok(html);
    }

    match message.parts.as_slice() {
        [single] => match &single.body {
            PartType::Text(text) => Ok(Some(text.to_string())),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};

    fn schedule_html(rows: &[[&str; 5]]) -> String {
        let mut html = String::from(
            r#"<html><body>
            <table width="600"><tr><td>Header banner</td></tr></table>
            <table width="600" cellpadding="4" style="border: 0; background-color: #FFFFFF;">
            <tr><th>#</th><th>Time</th><th>Court</th><th>Member</th><th>Status</th></tr>"#,
        );
        for row in rows {
            html.push_str("<tr>");
            for cell in row {
                html.push_str(&format!("<td><span>{cell}</span></td>"));
            }
            html.push_str("</tr>\n");
        }
        html.push_str("</table></body></html>");
        html
    }

    #[test]
    fn extracts_rows_and_skips_recurring() {
        let html = schedule_html(&[
            ["1", "1:30 PM", "Half Court A", "Jordan", "Paid"],
            ["2", "2:30 PM", "Full Court.", "Bird", "Paid"],
            ["3", "3:30 PM", "Half Court B", "Magic", "Recurring"],
        ]);

        let reservations = extract_reservations(&html);
        assert_eq!(reservations.len(), 2);
        assert_eq!(reservations["13:30"], vec!["Half Court A".to_string()]);
        assert_eq!(reservations["14:30"], vec!["Full Court".to_string()]);
        assert!(!reservations.contains_key("15:30"));
    }

    #[test]
    fn recurring_is_case_insensitive() {
        let html = schedule_html(&[
            ["1", "9:00 AM", "Half Court A", "x", "RECURRING"],
            ["2", "10:00 AM", "Half Court B", "y", "recurring"],
        ]);
        assert!(extract_reservations(&html).is_empty());
    }

    #[test]
    fn aggregates_courts_sharing_a_start_time() {
        let html = schedule_html(&[
            ["1", "7:00 PM", "Half Court A", "x", "Paid"],
            ["2", "7:00 PM", "Half Court B", "y", "Unpaid"],
            ["3", "7:00 PM", "Half Court A", "z", "Paid"],
        ]);
        let reservations = extract_reservations(&html);
        assert_eq!(
            reservations["19:00"],
            vec!["Half Court A".to_string(), "Half Court B".to_string()]
        );
    }

    #[test]
    fn drops_unreadable_rows_only() {
        let html = schedule_html(&[
            ["1", "25:99 PM", "Half Court A", "x", "Paid"],
            ["2", "TBD", "Half Court A", "x", "Paid"],
            ["3", "12:00 PM", "Half Court B", "y", "Paid"],
        ]);
        let reservations = extract_reservations(&html);
        assert_eq!(reservations.len(), 1);
        assert_eq!(reservations["12:00"], vec!["Half Court B".to_string()]);
    }

    #[test]
    fn missing_table_yields_nothing() {
        let html = "<html><body><table width=\"400\"><tr><td>nope</td></tr></table></body></html>";
        assert!(extract_reservations(html).is_empty());
    }

    #[test]
    fn reads_quoted_printable_multipart_email() {
        let html = schedule_html(&[["1", "6:30 PM", "Half Court B", "x", "Paid"]])
            .replace('=', "=3D");
        let message = format!(
            "From: bookings@example.com\r\n\
             Subject: CLC Basketball Hub - Latest daily booking schedule\r\n\
             Content-Type: multipart/alternative;\r\n \
             boundary=\"sep42\"\r\n\
             \r\n\
             preamble\r\n\
             --sep42\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             plain text body\r\n\
             --sep42\r\n\
             Content-Type: text/html; charset=utf-8\r\n\
             Content-Transfer-Encoding: quoted-printable\r\n\
             \r\n\
             {html}\r\n\
             --sep42--\r\n"
        );

        let reservations = reservations_from_message(&message).unwrap();
        assert_eq!(reservations["18:30"], vec!["Half Court B".to_string()]);
    }

    #[test]
    fn reads_base64_html_part() {
        let html = schedule_html(&[["1", "8:00 PM", "Full Court", "x", "Paid"]]);
        let message = format!(
            "Subject: schedule\nContent-Type: multipart/mixed; boundary=b1\n\n\
             --b1\nContent-Type: text/html\nContent-Transfer-Encoding: base64\n\n{}\n--b1--\n",
            STANDARD.encode(html)
        );
        let reservations = reservations_from_message(&message).unwrap();
        assert_eq!(reservations["20:00"], vec!["Full Court".to_string()]);
    }

    #[test]
    fn email_without_html_is_an_error() {
        let message = "Subject: hi\nContent-Type: multipart/mixed; boundary=b1\n\n\
                       --b1\nContent-Type: text/plain\n\nhello\n--b1--\n";
        assert!(matches!(
            reservations_from_message(message),
            Err(Error::Extraction(_))
        ));
    }

    #[test]
    fn single_part_message_is_taken_as_is() {
        let html = schedule_html(&[["1", "9:15 PM", "Half Court A", "x", "Paid"]]);
        let message = format!("From: bookings@example.com\nSubject: schedule\n\n{html}");
        let reservations = reservations_from_message(&message).unwrap();
        assert_eq!(reservations["21:15"], vec!["Half Court A".to_string()]);
    }

    #[test]
    fn cell_entities_are_decoded() {
        assert_eq!(cell_text("<b>Half&nbsp;Court&#32;B</b>&amp;"), "Half Court B &");
    }
}
