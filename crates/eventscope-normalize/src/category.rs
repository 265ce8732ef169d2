//! Keyword table mapping free-form tags and titles to [`EventCategory`].

use eventscope_core::EventCategory;

/// Checked in order; the first row with a matching keyword wins.
const KEYWORD_TABLE: &[(EventCategory, &[&str])] = &[
    (
        EventCategory::Festival,
        &["festival", "fest", "carnival", "street fair"],
    ),
    (
        EventCategory::Comedy,
        &["comedy", "comedian", "stand up", "standup", "improv", "roast"],
    ),
    (
        EventCategory::Theater,
        &["theater", "theatre", "musical", "opera", "ballet", "broadway", "cabaret"],
    ),
    (
        EventCategory::Film,
        &["film", "movie", "cinema", "screening", "premiere"],
    ),
    (
        EventCategory::Music,
        &[
            "concert", "live music", "band", "dj", "jazz", "blues", "rock", "hip hop", "orchestra",
            "symphony", "acoustic", "singer", "songwriter", "tour", "music", "gig", "choir",
        ],
    ),
    (
        EventCategory::Sports,
        &[
            "sports", "game", "match", "tournament", "marathon", "5k", "race", "vs", "football",
            "basketball", "baseball", "soccer", "hockey", "wrestling", "boxing",
        ],
    ),
    (
        EventCategory::FoodAndDrink,
        &[
            "food", "tasting", "wine", "beer", "brunch", "dinner", "cocktail", "brewery",
            "culinary", "chef", "food truck",
        ],
    ),
    (
        EventCategory::Nightlife,
        &["nightlife", "party", "club night", "karaoke", "trivia", "drag", "rave"],
    ),
    (
        EventCategory::Family,
        &["family", "kids", "children", "storytime", "all ages"],
    ),
    (
        EventCategory::Arts,
        &[
            "art",
            "arts",
            "gallery",
            "exhibition",
            "exhibit",
            "museum",
            "painting",
            "poetry",
            "craft",
        ],
    ),
    (
        EventCategory::Education,
        &["workshop", "class", "lecture", "seminar", "course", "talk", "panel"],
    ),
    (
        EventCategory::Community,
        &["community", "meetup", "volunteer", "market", "fundraiser", "charity", "networking"],
    ),
];

/// Picks a category for an event.
///
/// A tag that already names a category (`"music"`, `"theatre"`) is taken
/// verbatim. Otherwise tags, then the title, then the description are
/// scanned against the keyword table. Defaults to [`EventCategory::Other`].
#[must_use]
pub fn categorize(tags: &[String], title: &str, description: Option<&str>) -> EventCategory {
    if let Some(category) = tags
        .iter()
        .find_map(|tag| tag.parse::<EventCategory>().ok())
        .filter(|c| *c != EventCategory::Other)
    {
        return category;
    }

    let haystacks = [tags.join(" "), title.to_string(), description.unwrap_or("").to_string()];
    haystacks
        .iter()
        .map(|text| padded_words(text))
        .find_map(|words| match_keywords(&words))
        .unwrap_or(EventCategory::Other)
}

fn match_keywords(padded: &str) -> Option<EventCategory> {
    if padded.trim().is_empty() {
        return None;
    }
    KEYWORD_TABLE
        .iter()
        .find(|(_, keywords)| {
            keywords
                .iter()
                .any(|kw| padded.contains(&format!(" {kw} ")))
        })
        .map(|(category, _)| *category)
}

/// Lower-cases and replaces punctuation with spaces so keywords only match
/// whole words: `"Stand-Up!"` becomes `" stand up "`.
fn padded_words(text: &str) -> String {
    let words: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    format!(" {} ", words.split_whitespace().collect::<Vec<_>>().join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn category_named_tag_wins() {
        assert_eq!(
            categorize(&tags(&["Theatre"]), "Jazz Night", None),
            EventCategory::Theater
        );
    }

    #[test]
    fn first_table_row_wins() {
        // Festival is checked before music.
        assert_eq!(
            categorize(&[], "Summer Music Festival", None),
            EventCategory::Festival
        );
    }

    #[test]
    fn matches_whole_words_only() {
        // "start" must not match "art".
        assert_eq!(categorize(&[], "Start Here", None), EventCategory::Other);
        assert_eq!(
            categorize(&[], "Stand-Up Showcase", None),
            EventCategory::Comedy
        );
    }

    #[test]
    fn tags_are_checked_before_title() {
        assert_eq!(
            categorize(&tags(&["wine tasting"]), "Live Band Night", None),
            EventCategory::FoodAndDrink
        );
    }

    #[test]
    fn falls_back_to_description() {
        assert_eq!(
            categorize(&[], "Saturday Special", Some("An evening of improv")),
            EventCategory::Comedy
        );
    }

    #[test]
    fn defaults_to_other() {
        assert_eq!(categorize(&[], "Untitled", None), EventCategory::Other);
    }
}
