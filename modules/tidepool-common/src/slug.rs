//! Slug and tag hygiene. Tags are lower-case slugs (`[a-z0-9-]+`, length >= 4)
//! filtered against a fixed stop-word list plus a per-deployment blocklist.

use unicode_normalization::UnicodeNormalization;

/// Slugs shorter than this are rejected outright.
pub const MIN_TAG_LEN: usize = 4;

/// Generic terms that never survive into final event tags: calendar words,
/// genre-generic nouns, audience fillers, and adverb glue. Checked against
/// the slugified form.
pub const STOP_WORDS: &[&str] = &[
    // days
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
    "mondays", "tuesdays", "wednesdays", "thursdays", "fridays", "saturdays", "sundays",
    // months
    "january", "february", "march", "april", "june", "july", "august",
    "september", "october", "november", "december",
    // calendar and time words
    "today", "tomorrow", "yesterday", "tonight", "morning", "mornings", "afternoon",
    "afternoons", "evening", "evenings", "night", "nights", "week", "weeks", "weekly",
    "month", "months", "monthly", "year", "years", "yearly", "annual", "annually",
    "daily", "weekend", "weekends", "weekday", "weekdays", "season", "seasonal",
    "date", "dates", "time", "times", "schedule", "scheduled", "upcoming", "ongoing",
    "recurring", "hour", "hours", "hourly", "minute", "minutes",
    // genre-generic nouns
    "event", "events", "class", "classes", "course", "courses", "session", "sessions",
    "meeting", "meetings", "meetup", "meetups", "program", "programs", "programme",
    "activity", "activities", "gathering", "gatherings", "occasion", "occasions",
    "happening", "happenings", "function", "functions", "item", "items", "entry",
    "entries", "listing", "listings", "calendar", "calendars", "series", "title",
    "titles", "description", "descriptions", "announcement", "announcements",
    "reminder", "reminders", "update", "updates", "news", "notice", "notices",
    "info", "information", "detail", "details", "note", "notes",
    // place and org generic
    "community", "center", "centre", "centers", "centres", "club", "clubs", "group",
    "groups", "organization", "organizations", "location", "locations", "venue",
    "venues", "place", "places", "local", "area", "areas", "room", "rooms", "hall",
    "halls", "building", "buildings", "campus", "space", "spaces",
    // audience fillers
    "everyone", "everybody", "anyone", "anybody", "people", "person", "adult",
    "adults", "senior", "seniors", "member", "members", "public", "welcome",
    "guest", "guests", "visitor", "visitors", "attendee", "attendees",
    "participant", "participants", "folks",
    // descriptors and glue
    "free", "open", "special", "general", "various", "misc", "miscellaneous",
    "other", "others", "more", "most", "some", "many", "much", "several",
    "also", "very", "really", "just", "quite", "actually", "basically",
    "definitely", "certainly", "probably", "maybe", "perhaps", "together",
    "again", "soon", "later", "early", "late", "about", "around", "between",
    "during", "after", "before", "under", "over", "from", "into", "onto",
    "than", "then", "them", "they", "their", "there", "here", "this", "that",
    "these", "those", "what", "when", "where", "which", "while", "your",
    "yours", "will", "would", "could", "should", "shall", "must", "have",
    "having", "been", "being", "with", "without",
    // generic call-to-action verbs
    "join", "joins", "joined", "register", "registration", "signup", "rsvp",
    "visit", "attend", "attending", "come", "comes", "coming", "presented",
    "presents", "hosted", "hosting", "featuring", "featured",
];

/// Lower-case, fold diacritics, collapse non-alphanumerics to single `-`,
/// trim leading/trailing `-`. Returns `""` when the result is shorter than
/// [`MIN_TAG_LEN`]. Idempotent.
pub fn slugify(input: &str) -> String {
    let folded: String = input
        .nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect();

    let mut out = String::with_capacity(folded.len());
    let mut last_dash = true; // suppress leading dash
    for c in folded.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }

    if out.len() < MIN_TAG_LEN {
        String::new()
    } else {
        out
    }
}

pub fn is_stop_word(slug: &str) -> bool {
    STOP_WORDS.contains(&slug)
}

/// Case- and accent-insensitive key for name matching (category reuse).
pub fn fold_for_match(name: &str) -> String {
    name.nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
        .trim()
        .to_string()
}

/// Slugify each raw tag, drop empties, stop-words, and blocklisted slugs,
/// and de-duplicate preserving first-occurrence order.
pub fn filter_tags<I, S>(raw: I, blocklist: &[String]) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for tag in raw {
        let slug = slugify(tag.as_ref());
        if slug.is_empty() || is_stop_word(&slug) || blocklist.iter().any(|b| b == &slug) {
            continue;
        }
        if seen.insert(slug.clone()) {
            out.push(slug);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_basic() {
        assert_eq!(slugify("Community Yoga in the Park"), "community-yoga-in-the-park");
        assert_eq!(slugify("  Rock & Roll!  "), "rock-roll");
    }

    #[test]
    fn slugify_idempotent() {
        let once = slugify("Sound Bath + Meditation (all levels)");
        assert_eq!(slugify(&once), once);
    }

    #[test]
    fn slugify_rejects_short() {
        assert_eq!(slugify("DJ"), "");
        assert_eq!(slugify("a b"), "");
        assert_eq!(slugify("art"), "");
    }

    #[test]
    fn slugify_folds_accents() {
        assert_eq!(slugify("Café Conversación"), "cafe-conversacion");
    }

    #[test]
    fn stop_words_filtered() {
        let tags = filter_tags(
            ["yoga", "event", "wellness", "Tuesday", "free", "outdoors"],
            &[],
        );
        assert_eq!(tags, vec!["yoga", "wellness", "outdoors"]);
    }

    #[test]
    fn blocklist_filtered() {
        let block = vec!["yoga".to_string()];
        let tags = filter_tags(["yoga", "wellness"], &block);
        assert_eq!(tags, vec!["wellness"]);
    }

    #[test]
    fn filter_dedups_preserving_order() {
        let tags = filter_tags(["Live Music", "live-music", "jazz"], &[]);
        assert_eq!(tags, vec!["live-music", "jazz"]);
    }

    #[test]
    fn fold_for_match_accent_insensitive() {
        assert_eq!(fold_for_match("Música en Vivo"), fold_for_match("musica en vivo"));
    }
}
