//! iCalendar (RFC 5545) export of a plan schedule: one VEVENT per scheduled
//! lesson, at a fixed local start time on its estimated date.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Utc};

use crate::schedule::PlanSchedule;

pub const DEFAULT_LESSON_MINUTES: i64 = 45;
const PRODID: &str = "-//Bible Lesson Planner//EN";
const UTC_STAMP: &str = "%Y%m%dT%H%M%SZ";
const FLOATING: &str = "%Y%m%dT%H%M%S";
const MAX_LINE_OCTETS: usize = 75;

/// Minutes from free text like "45 min", "1 hour" or "90". Falls back to
/// [`DEFAULT_LESSON_MINUTES`] when no positive number is present.
pub fn duration_minutes(raw: &str) -> i64 {
    let text = raw.trim().to_ascii_lowercase();
    let Some(start) = text.find(|c: char| c.is_ascii_digit()) else {
        return DEFAULT_LESSON_MINUTES;
    };
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let value = match digits.parse::<i64>() {
        Ok(v) if v > 0 => v,
        _ => return DEFAULT_LESSON_MINUTES,
    };
    let unit = text[start + digits.len()..].trim_start();
    if unit.starts_with('h') {
        value.saturating_mul(60)
    } else {
        value
    }
}

/// TEXT value escaping: backslash, newline, comma, semicolon.
pub fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            ',' => out.push_str("\\,"),
            ';' => out.push_str("\\;"),
            _ => out.push(c),
        }
    }
    out
}

/// Folds a content line at 75 octets without splitting a UTF-8 sequence.
fn push_folded(out: &mut String, line: &str) {
    let mut rest = line;
    let mut limit = MAX_LINE_OCTETS;
    loop {
        if rest.len() <= limit {
            out.push_str(rest);
            out.push_str("\r\n");
            return;
        }
        let mut cut = limit;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        out.push_str(&rest[..cut]);
        out.push_str("\r\n ");
        rest = &rest[cut..];
        // Continuation lines spend one octet on the leading space.
        limit = MAX_LINE_OCTETS - 1;
    }
}

pub struct CalendarExport<'a> {
    pub plan_id: &'a str,
    pub plan_title: &'a str,
    pub start_time: NaiveTime,
    pub stamp: DateTime<Utc>,
}

impl CalendarExport<'_> {
    /// Renders the whole VCALENDAR with CRLF line endings.
    pub fn render(&self, schedule: &PlanSchedule) -> String {
        let mut out = String::new();
        let stamp = self.stamp.format(UTC_STAMP).to_string();
        for line in [
            "BEGIN:VCALENDAR".to_string(),
            "VERSION:2.0".to_string(),
            format!("PRODID:{}", PRODID),
            "CALSCALE:GREGORIAN".to_string(),
            "METHOD:PUBLISH".to_string(),
            format!("X-WR-CALNAME:{}", escape_text(self.plan_title)),
        ] {
            push_folded(&mut out, &line);
        }

        for (index, slot) in schedule.lesson_schedule.iter().enumerate() {
            let starts = NaiveDateTime::new(slot.estimated_date, self.start_time);
            let minutes = duration_minutes(&slot.lesson.duration);
            let ends = starts
                .checked_add_signed(Duration::minutes(minutes))
                .unwrap_or(starts);
            let description = format!(
                "Passage: {}\nTheme: {}\nWeek {} of {}",
                slot.lesson.passage,
                slot.lesson.theme,
                slot.week_number,
                schedule.weeks_duration.max(1)
            );
            for line in [
                "BEGIN:VEVENT".to_string(),
                format!("UID:{}-{}@curriculumd", self.plan_id, index),
                format!("DTSTAMP:{}", stamp),
                format!("DTSTART:{}", starts.format(FLOATING)),
                format!("DTEND:{}", ends.format(FLOATING)),
                format!(
                    "SUMMARY:{}",
                    escape_text(&format!("Bible Lesson: {}", slot.lesson.title))
                ),
                format!("DESCRIPTION:{}", escape_text(&description)),
                "STATUS:CONFIRMED".to_string(),
                "END:VEVENT".to_string(),
            ] {
                push_folded(&mut out, &line);
            }
        }

        push_folded(&mut out, "END:VCALENDAR");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{build_schedule, DateRange, Lesson, RangePolicy};
    use chrono::{NaiveDate, TimeZone};

    fn lesson(id: &str, title: &str, duration: &str) -> Lesson {
        Lesson {
            id: id.to_string(),
            title: title.to_string(),
            passage: "Mark 4:35-41".to_string(),
            theme: "Peace, trust; courage".to_string(),
            duration: duration.to_string(),
        }
    }

    #[test]
    fn durations_from_free_text() {
        assert_eq!(duration_minutes("45 min"), 45);
        assert_eq!(duration_minutes("60 minutes"), 60);
        assert_eq!(duration_minutes("1 hour"), 60);
        assert_eq!(duration_minutes("2h"), 120);
        assert_eq!(duration_minutes("about 30"), 30);
        assert_eq!(duration_minutes(""), DEFAULT_LESSON_MINUTES);
        assert_eq!(duration_minutes("0 min"), DEFAULT_LESSON_MINUTES);
        assert_eq!(duration_minutes("a while"), DEFAULT_LESSON_MINUTES);
    }

    #[test]
    fn text_escaping() {
        assert_eq!(escape_text("a,b;c\nd\\e"), "a\\,b\\;c\\nd\\\\e");
        assert_eq!(escape_text("line\r\nbreak"), "line\\nbreak");
    }

    #[test]
    fn long_lines_fold_on_char_boundaries() {
        let mut out = String::new();
        let line = format!("SUMMARY:{}", "é".repeat(60));
        push_folded(&mut out, &line);
        for physical in out.split("\r\n").filter(|l| !l.is_empty()) {
            assert!(physical.len() <= MAX_LINE_OCTETS, "{:?}", physical);
        }
        let unfolded = out.trim_end_matches("\r\n").replace("\r\n ", "");
        assert_eq!(unfolded, line);
    }

    #[test]
    fn renders_one_event_per_scheduled_lesson() {
        let catalog = vec![
            lesson("a", "Jesus Calms the Storm", "45 min"),
            lesson("b", "Feeding the 5,000", "1 hour"),
        ];
        let range = DateRange::parse("2024-01-07", "2024-01-21", RangePolicy::Reject)
            .expect("range");
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).expect("date");
        let schedule = build_schedule(
            range,
            &["a".to_string(), "b".to_string()],
            &catalog,
            today,
        );
        let export = CalendarExport {
            plan_id: "plan-1",
            plan_title: "Miracles",
            start_time: NaiveTime::from_hms_opt(9, 30, 0).expect("time"),
            stamp: Utc
                .with_ymd_and_hms(2024, 1, 2, 12, 0, 0)
                .single()
                .expect("stamp"),
        };
        let ics = export.render(&schedule);

        assert!(ics.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(ics.ends_with("END:VCALENDAR\r\n"));
        assert_eq!(ics.matches("BEGIN:VEVENT").count(), 2);
        assert!(ics.contains("UID:plan-1-0@curriculumd\r\n"));
        assert!(ics.contains("DTSTAMP:20240102T120000Z\r\n"));
        assert!(ics.contains("DTSTART:20240107T093000\r\nDTEND:20240107T101500\r\n"));
        assert!(ics.contains("DTSTART:20240114T093000\r\nDTEND:20240114T103000\r\n"));
        let unfolded = ics.replace("\r\n ", "");
        assert!(unfolded.contains("SUMMARY:Bible Lesson: Feeding the 5\\,000\r\n"));
        assert!(unfolded.contains("Theme: Peace\\, trust\\; courage\\nWeek 2 of 2\r\n"));
    }
}
