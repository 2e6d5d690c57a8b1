//! Heuristics that find the event blocks on the rendered schedule page.

use log::{debug, trace};
use scraper::{ElementRef, Html, Node};

use super::grammar::{self, Collector};
use crate::models::EventSighting;
use crate::settings::Strategy;

/// Maximum number of parents climbed from the panel header to find the panel itself.
const MAX_CLIMB: usize = 5;
/// An element with at least this many child elements is considered the panel.
const MIN_PANEL_CHILDREN: usize = 3;

/// Extract all events from the page HTML, in page order.
pub fn events(html: &str, strategy: Strategy) -> Vec<EventSighting> {
    let document = Html::parse_document(html);

    match strategy {
        Strategy::Dom => dom_walk(&document),
        Strategy::Text => text_scan(&document),
        Strategy::Auto => {
            let events = dom_walk(&document);
            if events.is_empty() {
                debug!("DOM walk found no events, falling back to text scan");
                text_scan(&document)
            } else {
                events
            }
        }
    }
}

/// Locate the panel below the `UPCOMING EVENTS` header and read every event row in it.
pub fn dom_walk(document: &Html) -> Vec<EventSighting> {
    let header = match find_header(document.root_element()) {
        Some(header) => header,
        None => {
            debug!("no 'UPCOMING EVENTS' header on the page");
            return Vec::new();
        }
    };

    let root = panel_root(header);
    debug!("using <{}> as events panel", root.value().name());

    let mut collector = Collector::default();
    for event in collect_rows(root) {
        let name = event.name.clone();
        if !collector.push(event) {
            trace!("skipping repeated event '{}'", name);
        }
    }
    collector.into_events()
}

/// The first element whose own text names the panel. Falls back to the deepest element whose
/// combined text does, for headers split over several inline elements.
fn find_header(root: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let own = root
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(is_visible)
        .find(|el| grammar::has_header(&own_text(*el)));
    if own.is_some() {
        return own;
    }

    if !grammar::has_header(&element_text(root)) {
        return None;
    }

    let mut current = root;
    while let Some(child) = current
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| !is_hidden(el))
        .find(|el| grammar::has_header(&element_text(*el)))
    {
        current = child;
    }

    Some(current)
}

/// Climb from the header until an element with enough children shows up.
fn panel_root(header: ElementRef<'_>) -> ElementRef<'_> {
    let mut root = header;

    for _ in 0..MAX_CLIMB {
        if root.children().filter_map(ElementRef::wrap).count() >= MIN_PANEL_CHILDREN {
            break;
        }
        match root.parent().and_then(ElementRef::wrap) {
            Some(parent) => root = parent,
            None => break,
        }
    }

    root
}

/// Sightings in the subtree below `el`, in page order. Innermost rows are preferred, so wrappers
/// around several rows don't merge them. An element wrapping a single sighting replaces it when
/// its own name extends the inner one, as happens for a name cell next to a labelled countdown
/// cell.
fn collect_rows(el: ElementRef<'_>) -> Vec<EventSighting> {
    if is_hidden(&el) {
        return Vec::new();
    }

    let mut inner: Vec<_> = el
        .children()
        .filter_map(ElementRef::wrap)
        .flat_map(collect_rows)
        .collect();
    if inner.len() > 1 {
        return inner;
    }

    let text = grammar::collapse(&element_text(el));
    let own = if grammar::is_block(&text) {
        grammar::parse_block(&text)
    } else {
        None
    };

    match (inner.pop(), own) {
        (None, own) => own.into_iter().collect(),
        (Some(child), Some(own)) if extends(&own.name, &child.name) => {
            trace!("'{}' replaces inner '{}'", own.name, child.name);
            vec![own]
        }
        (Some(child), _) => vec![child],
    }
}

/// Whether `outer` is `inner` with something in front, ignoring case.
fn extends(outer: &str, inner: &str) -> bool {
    let (outer, inner) = (outer.to_lowercase(), inner.to_lowercase());
    outer.len() > inner.len() && outer.ends_with(&inner)
}

/// Read the visible page text line by line after the panel header.
pub fn text_scan(document: &Html) -> Vec<EventSighting> {
    let lines = visible_lines(document.root_element());
    let start = match lines.iter().position(|line| grammar::has_header(line)) {
        Some(pos) => pos + 1,
        None => {
            debug!("no 'UPCOMING EVENTS' line in the page text");
            return Vec::new();
        }
    };

    let mut collector = Collector::default();
    let mut pending: Option<String> = None;

    for line in &lines[start..] {
        if grammar::is_block(line) {
            // A bare marker line belongs to the name line above it.
            let block = match (pending.take(), grammar::parse_block(line)) {
                (Some(name), None) => format!("{} {}", name, line),
                (Some(name), Some(_)) => {
                    flush(&name, &mut collector);
                    line.clone()
                }
                (None, _) => line.clone(),
            };
            flush(&block, &mut collector);
        } else if let Some(name) = pending.replace(line.clone()) {
            flush(&name, &mut collector);
        }
    }

    if let Some(name) = pending {
        flush(&name, &mut collector);
    }

    collector.into_events()
}

fn flush(block: &str, collector: &mut Collector) {
    if let Some(event) = grammar::parse_block(block) {
        collector.push(event);
    }
}

/// All non-empty text nodes outside of scripts and styles, whitespace collapsed.
fn visible_lines(root: ElementRef<'_>) -> Vec<String> {
    root.descendants()
        .filter_map(|node| match node.value() {
            Node::Text(text) => Some((node, text)),
            _ => None,
        })
        .filter(|(node, _)| {
            node.parent()
                .and_then(ElementRef::wrap)
                .map_or(true, |el| is_visible(&el))
        })
        .map(|(_, text)| grammar::collapse(text))
        .filter(|line| !line.is_empty())
        .collect()
}

/// Neither the element nor any of its ancestors is a non-rendered element.
fn is_visible(el: &ElementRef<'_>) -> bool {
    !is_hidden(el)
        && el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .all(|a| !is_hidden(&a))
}

fn is_hidden(el: &ElementRef<'_>) -> bool {
    matches!(
        el.value().name(),
        "script" | "style" | "noscript" | "template" | "head"
    )
}

/// Text of the direct text children only.
fn own_text(el: ElementRef<'_>) -> String {
    el.children()
        .filter_map(|node| node.value().as_text().map(|t| &**t))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of the element and all its descendants. Text nodes are joined with spaces so adjacent
/// cells like `<td>Bifrost</td><td>01:00:00</td>` stay separate words.
fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveTime;

    use super::*;
    use crate::models::Status;

    const PANEL: &str = r#"
        <html>
        <head><title>Upcoming Events | KO4Fun</title><script>var t = "NOW ACTIVE 00:00:01";</script></head>
        <body>
          <nav><a href="/">Home</a><a href="/rankings">Rankings</a><a href="/events">Events</a></nav>
          <div class="card">
            <div class="card-header"><h5>Upcoming Events</h5></div>
            <div class="card-body">
              <div class="server-time">Server Time: <span>13:37:00</span></div>
              <div class="event">
                <div class="event-row"><span class="name">Lunar War</span><span class="badge">NOW ACTIVE</span></div>
              </div>
              <div class="event">
                <div class="event-row"><span class="name">Bifrost (20:00)</span><span class="timer">01:23:45</span></div>
              </div>
              <div class="event">
                <div class="event-row"><span class="name">Castle Siege</span><span class="timer">00:00:31</span></div>
              </div>
              <div class="event">
                <div class="event-row"><span class="name">bifrost</span><span class="timer">05:00:00</span></div>
              </div>
            </div>
          </div>
          <footer>All rights reserved</footer>
        </body>
        </html>
    "#;

    fn expected() -> Vec<EventSighting> {
        vec![
            EventSighting::new("Lunar War", Status::Active),
            EventSighting::new("Bifrost", Status::Remaining(Duration::from_secs(5025))),
            EventSighting::new("Castle Siege", Status::Remaining(Duration::from_secs(31))),
        ]
    }

    #[test]
    fn dom_walk_reads_panel_rows() {
        let document = Html::parse_document(PANEL);
        assert_eq!(expected(), dom_walk(&document));
    }

    #[test]
    fn text_scan_joins_split_lines() {
        let document = Html::parse_document(PANEL);
        assert_eq!(expected(), text_scan(&document));
    }

    #[test]
    fn text_scan_keeps_scheduled_only_events() {
        let document = Html::parse_document(
            r#"<body>
                <p>UPCOMING EVENTS</p>
                <p>Juraid Mountain (19:00)</p>
                <p>Chaos Dungeon</p>
                <p>00:10:00</p>
            </body>"#,
        );

        assert_eq!(
            vec![
                EventSighting::new(
                    "Juraid Mountain",
                    Status::At(NaiveTime::from_hms_opt(19, 0, 0).unwrap())
                ),
                EventSighting::new("Chaos Dungeon", Status::Remaining(Duration::from_secs(600))),
            ],
            text_scan(&document)
        );
    }

    #[test]
    fn auto_falls_back_to_text() {
        // Name and countdown are siblings directly in the panel, so no element holds a row.
        let html = r#"<body><div>
            <h4>Upcoming Events</h4><p>Bifrost</p><p>00:05:00</p>
        </div></body>"#;

        assert!(events(html, Strategy::Dom).is_empty());

        assert_eq!(
            vec![EventSighting::new(
                "Bifrost",
                Status::Remaining(Duration::from_secs(300))
            )],
            events(html, Strategy::Auto)
        );
    }

    #[test]
    fn header_split_over_elements_is_found() {
        let html = r#"<body><div id="panel">
            <h3><b>UPCOMING</b> <b>EVENTS</b></h3>
            <p>Bifrost 00:05:00</p><p>Lunar War NOW ACTIVE</p><p>-</p>
        </div></body>"#;

        let names: Vec<_> = events(html, Strategy::Dom)
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(vec!["Bifrost", "Lunar War"], names);
    }

    const LABELLED: &str = r#"<body><section>
        <h4>Upcoming Events</h4>
        <div class="event"><h6>Bifrost</h6><p>Starts in 01:23:45</p></div>
        <div class="event"><h6>Lunar War</h6><p>Starts in 00:30:00</p></div>
        <div class="event"><h6>Castle Siege</h6><p>Starts in 02:00:00</p></div>
    </section></body>"#;

    fn labelled() -> Vec<EventSighting> {
        vec![
            EventSighting::new("Bifrost", Status::Remaining(Duration::from_secs(5025))),
            EventSighting::new("Lunar War", Status::Remaining(Duration::from_secs(1800))),
            EventSighting::new("Castle Siege", Status::Remaining(Duration::from_secs(7200))),
        ]
    }

    #[test]
    fn labelled_countdown_cells_keep_row_names() {
        assert_eq!(labelled(), events(LABELLED, Strategy::Dom));
        assert_eq!(labelled(), events(LABELLED, Strategy::Auto));
        assert_eq!(labelled(), events(LABELLED, Strategy::Text));
    }

    #[test]
    fn unknown_countdown_labels_keep_the_row() {
        let html = r#"<body><section>
            <h4>Upcoming Events</h4>
            <div class="event"><h6>Bifrost</h6><p>Timer 01:23:45</p></div>
            <div class="event"><h6>Lunar War</h6><p>Timer 00:30:00</p></div>
            <div class="event"><h6>Castle Siege</h6><p>NOW ACTIVE</p></div>
        </section></body>"#;

        let names: Vec<_> = events(html, Strategy::Dom)
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(vec!["Bifrost Timer", "Lunar War Timer", "Castle Siege"], names);
    }

    #[test]
    fn single_row_wrappers_keep_the_row() {
        let html = r#"<body><div>
            <h4>Upcoming Events</h4><hr>
            <div class="list"><div class="wrap"><div class="row">Bifrost 00:05:00</div></div></div>
        </div></body>"#;

        assert_eq!(
            vec![EventSighting::new(
                "Bifrost",
                Status::Remaining(Duration::from_secs(300))
            )],
            events(html, Strategy::Dom)
        );
    }

    #[test]
    fn no_header_no_events() {
        let html = "<body><p>Bifrost 00:05:00</p></body>";
        assert!(events(html, Strategy::Auto).is_empty());
    }
}
