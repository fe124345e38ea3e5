use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use crate::models::StudentRecord;

static AVATAR: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"img[height="256"]"#).unwrap());
static LAST_LOGIN: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"time[data-format="%B %e, %Y %l:%M%P"]"#).unwrap());
static HEADING: Lazy<Selector> = Lazy::new(|| Selector::parse("h2").unwrap());
static PROJECT_ROW: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.border-b.border-slate-800").unwrap());
static PROJECT_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("li.flex.gap-3.px-3.py-2.text-sm a[href]").unwrap());
static SEASON_CARD: Lazy<Selector> = Lazy::new(|| Selector::parse("div.card-with-header").unwrap());
static CARD_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("h2.text-xl").unwrap());
static BAR_YELLOW: Lazy<Selector> = Lazy::new(|| Selector::parse("div.bg-yellow-400").unwrap());
static BAR_GREEN: Lazy<Selector> = Lazy::new(|| Selector::parse("div.bg-green-500").unwrap());
static STAT_ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("li.row.flex").unwrap());
static SPAN: Lazy<Selector> = Lazy::new(|| Selector::parse("span").unwrap());
static POINTS_BADGE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.flex.items-center.gap-2").unwrap());
static SVG: Lazy<Selector> = Lazy::new(|| Selector::parse("svg").unwrap());

/// Parses one profile page into a [`StudentRecord`].
///
/// The markup is an uncontrolled third party's and changes without notice, so
/// every sub-extraction tolerates absence on its own: a missing section costs
/// that field, never the record.
pub fn extract(html: &str, username: &str) -> StudentRecord {
    let document = Html::parse_document(html);

    StudentRecord {
        name: username.to_string(),
        img: extract_avatar(&document),
        last_log_in: Some(extract_last_login(&document)),
        ongoing_projects: extract_project_section(&document, "Projects In Progress"),
        completed_projects: extract_project_section(&document, "Projects Completed"),
        seasons: extract_season_progress(&document, username),
        exercises_completed: extract_exercises_completed(&document),
        points: extract_points(&document),
    }
}

fn extract_avatar(document: &Html) -> Option<String> {
    document
        .select(&AVATAR)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::to_string)
}

fn extract_last_login(document: &Html) -> String {
    document
        .select(&LAST_LOGIN)
        .next()
        .map(|time| text_of(time))
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| "N/A".to_string())
}

/// Collects project names under the section headed by `phrase`, in document
/// order. No heading means no section on this profile: an empty list.
fn extract_project_section(document: &Html, phrase: &str) -> Vec<String> {
    let Some(heading) = document
        .select(&HEADING)
        .find(|h| text_of(*h).contains(phrase))
    else {
        return Vec::new();
    };

    let Some(container) = nearest_full_width_container(heading) else {
        warn!(phrase, "project heading found but no section container");
        return Vec::new();
    };

    container
        .select(&PROJECT_ROW)
        .filter_map(|row| row.select(&PROJECT_LINK).next())
        .map(|link| text_of(link))
        .filter(|name| !name.is_empty())
        .collect()
}

/// Walks up from a section heading to its nearest full-width ancestor, which
/// bounds the section's rows.
fn nearest_full_width_container(heading: ElementRef) -> Option<ElementRef> {
    heading.ancestors().find_map(|node| {
        let element = ElementRef::wrap(node)?;
        element
            .value()
            .classes()
            .any(|class| class == "col-span-full")
            .then_some(element)
    })
}

/// One card per track: `h2.text-xl` names the track, the colored bar's inline
/// width is the progress. A card without a bar keeps the `"Unknown"` sentinel;
/// it is coerced to zero during planning, not here.
fn extract_season_progress(document: &Html, username: &str) -> BTreeMap<String, String> {
    let mut seasons = BTreeMap::new();

    for card in document.select(&SEASON_CARD) {
        let Some(track_name) = card
            .select(&CARD_TITLE)
            .next()
            .map(|h| text_of(h))
            .filter(|name| !name.is_empty())
        else {
            warn!(username, "season card without a track heading, skipping");
            continue;
        };

        let bar = card
            .select(&BAR_YELLOW)
            .next()
            .or_else(|| card.select(&BAR_GREEN).next());
        let percent = bar
            .and_then(|bar| bar.value().attr("style"))
            .and_then(parse_bar_width)
            .unwrap_or_else(|| "Unknown".to_string());

        seasons.insert(track_name, percent);
    }

    seasons
}

fn parse_bar_width(style: &str) -> Option<String> {
    let (_, width) = style.split_once("width:")?;
    let width = width.trim().trim_end_matches(';').trim();
    (!width.is_empty()).then(|| width.to_string())
}

fn extract_exercises_completed(document: &Html) -> Option<String> {
    document
        .select(&STAT_ROW)
        .find(|row| text_of(*row).contains("Exercises Completed"))
        .and_then(|row| row.select(&SPAN).nth(1))
        .map(|span| text_of(span))
        .filter(|text| !text.is_empty())
}

fn extract_points(document: &Html) -> Option<String> {
    for badge in document.select(&POINTS_BADGE) {
        if badge.select(&SVG).next().is_none() {
            continue;
        }
        if let Some(span) = badge.select(&SPAN).last() {
            let text = text_of(span);
            if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
                return Some(text);
            }
        }
    }
    None
}

fn text_of(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"
    <html><body>
      <img height="256" src="https://cdn.example/avatars/moreira_t.png" />
      <time data-format="%B %e, %Y %l:%M%P">June 1, 2024 3:00PM</time>
      <div class="card-with-header">
        <h2 class="text-xl">Season 01</h2>
        <div class="bg-yellow-400" style="width: 42%;"></div>
      </div>
      <div class="col-span-full">
        <h2>Projects Completed</h2>
        <div class="border-b border-slate-800">
          <li class="flex gap-3 px-3 py-2 text-sm"><a href="/p/capstone">Capstone</a></li>
        </div>
      </div>
      <li class="row flex"><span>Exercises Completed</span><span>128</span></li>
      <div class="flex items-center gap-2"><svg></svg><span>950</span></div>
    </body></html>"#;

    #[test]
    fn extracts_full_profile() {
        let record = extract(PROFILE, "moreira_t");
        assert_eq!(record.name, "moreira_t");
        assert_eq!(
            record.img.as_deref(),
            Some("https://cdn.example/avatars/moreira_t.png")
        );
        assert_eq!(record.last_log_in.as_deref(), Some("June 1, 2024 3:00PM"));
        assert_eq!(record.seasons.get("Season 01").map(String::as_str), Some("42%"));
        assert_eq!(record.completed_projects, vec!["Capstone"]);
        assert!(record.ongoing_projects.is_empty());
        assert_eq!(record.exercises_completed.as_deref(), Some("128"));
        assert_eq!(record.points.as_deref(), Some("950"));
    }

    #[test]
    fn missing_sections_yield_defaults_not_errors() {
        let record = extract("<html><body></body></html>", "ghost_s");
        assert_eq!(record.name, "ghost_s");
        assert_eq!(record.img, None);
        assert_eq!(record.last_log_in.as_deref(), Some("N/A"));
        assert!(record.ongoing_projects.is_empty());
        assert!(record.completed_projects.is_empty());
        assert!(record.seasons.is_empty());
        assert_eq!(record.exercises_completed, None);
        assert_eq!(record.points, None);
    }

    #[test]
    fn card_without_bar_keeps_unknown_sentinel() {
        let html = r#"
        <div class="card-with-header">
          <h2 class="text-xl">Preseason Web</h2>
        </div>"#;
        let record = extract(html, "a_b");
        assert_eq!(
            record.seasons.get("Preseason Web").map(String::as_str),
            Some("Unknown")
        );
    }

    #[test]
    fn green_bar_is_read_like_yellow() {
        let html = r#"
        <div class="card-with-header">
          <h2 class="text-xl">Season 02 Software Engineer</h2>
          <div class="progress"><div class="bg-green-500" style="width:100%"></div></div>
        </div>"#;
        let record = extract(html, "a_b");
        assert_eq!(
            record.seasons.get("Season 02 Software Engineer").map(String::as_str),
            Some("100%")
        );
    }

    #[test]
    fn project_order_is_document_order() {
        let html = r#"
        <div class="col-span-full">
          <h2>Projects In Progress</h2>
          <div class="border-b border-slate-800">
            <li class="flex gap-3 px-3 py-2 text-sm"><a href="/p/a">My Printf</a></li>
          </div>
          <div class="border-b border-slate-800">
            <li class="flex gap-3 px-3 py-2 text-sm"><a href="/p/b">My Ls</a></li>
          </div>
        </div>"#;
        let record = extract(html, "a_b");
        assert_eq!(record.ongoing_projects, vec!["My Printf", "My Ls"]);
    }

    #[test]
    fn heading_is_matched_by_containment() {
        // The live portal wraps the phrase in decorated headings.
        let html = r#"
        <div class="grid">
          <div class="col-span-full">
            <h2 class="font-bold">  Projects Completed (3)  </h2>
            <div class="border-b border-slate-800">
              <li class="flex gap-3 px-3 py-2 text-sm"><a href="/p/c">My Malloc</a></li>
            </div>
          </div>
        </div>"#;
        let record = extract(html, "a_b");
        assert_eq!(record.completed_projects, vec!["My Malloc"]);
    }

    #[test]
    fn points_badge_requires_svg_and_digits() {
        let html = r#"
        <div class="flex items-center gap-2"><span>not points</span></div>
        <div class="flex items-center gap-2"><svg></svg><span>lvl</span><span>77</span></div>"#;
        let record = extract(html, "a_b");
        assert_eq!(record.points.as_deref(), Some("77"));
    }
}
