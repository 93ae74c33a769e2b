//! Content calendar: picks today's niche, topic and style.
//!
//! Rotation rules:
//! - no niche is served two selections in a row (when more than one is configured)
//! - niches cycle evenly, each pass is a fresh random permutation
//! - a topic is not repeated within a niche until every topic of that niche was used
//! - styles cycle evenly and independently of niches

use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info, warn};

use crate::config::{Niche, Style};
use crate::error::StoreError;
use crate::store::{CALENDAR_KEY, DocumentStore};

pub const MAX_POSTS: usize = 90;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub date: String,
    pub niche: String,
    pub topic: String,
    pub style: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarState {
    /// Most recent last.
    pub posts: Vec<Selection>,
    pub niche_cycle: VecDeque<String>,
    pub style_cycle: VecDeque<String>,
    pub used_topics: BTreeMap<String, BTreeSet<String>>,
}

impl CalendarState {
    pub fn last_niche(&self) -> Option<&str> {
        self.posts.last().map(|p| p.niche.as_str())
    }

    /// Drops identifiers and topics that are no longer in the catalogs, and
    /// duplicate cycle entries, so a hand-edited or stale document cannot
    /// break the rotation invariants.
    pub fn sanitize(&mut self, niches: &[Niche], styles: &[Style]) {
        let niche_ids: BTreeSet<&str> = niches.iter().map(|n| n.id.as_str()).collect();
        let style_ids: BTreeSet<&str> = styles.iter().map(|s| s.id.as_str()).collect();

        dedupe_known(&mut self.niche_cycle, &niche_ids);
        dedupe_known(&mut self.style_cycle, &style_ids);

        self.used_topics.retain(|id, _| niche_ids.contains(id.as_str()));
        for niche in niches {
            if let Some(used) = self.used_topics.get_mut(&niche.id) {
                let before = used.len();
                used.retain(|t| niche.topics.contains(t));
                if used.len() != before {
                    debug!(niche = %niche.id, dropped = before - used.len(), "Dropped unknown topics");
                }
            }
        }

        if self.posts.len() > MAX_POSTS {
            let excess = self.posts.len() - MAX_POSTS;
            self.posts.drain(..excess);
        }
    }
}

fn dedupe_known(cycle: &mut VecDeque<String>, known: &BTreeSet<&str>) {
    let mut seen = BTreeSet::new();
    cycle.retain(|id| known.contains(id.as_str()) && seen.insert(id.clone()));
}

/// Catalog ids in order, each once.
fn unique_ids<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    ids.filter(|id| seen.insert(*id)).map(str::to_string).collect()
}

/// Pick today's niche, ensuring no back-to-back repeats and even cycling.
pub fn pick_niche<R: Rng + ?Sized>(state: &mut CalendarState, niches: &[Niche], rng: &mut R) -> String {
    let last = state.last_niche().map(str::to_owned);
    let mut cycle = unique_ids(niches.iter().map(|n| n.id.as_str()));
    let multiple = cycle.len() > 1;

    if state.niche_cycle.is_empty() {
        cycle.shuffle(rng);
        let mut cycle = VecDeque::from(cycle);
        if multiple && cycle.front() == last.as_ref() {
            cycle.rotate_left(1);
        }
        debug!(?cycle, "Starting new niche cycle");
        state.niche_cycle = cycle;
    }

    // The cycle was repopulated above if it was empty and niches is non-empty.
    let mut chosen = state.niche_cycle.pop_front().unwrap_or_default();

    if multiple && Some(&chosen) == last.as_ref() {
        state.niche_cycle.push_back(chosen);
        chosen = state.niche_cycle.pop_front().unwrap_or_default();
    }

    chosen
}

/// Pick an unused topic from the niche. Resets the niche when all are used.
pub fn pick_topic<R: Rng + ?Sized>(state: &mut CalendarState, niche: &Niche, rng: &mut R) -> String {
    let used = state.used_topics.entry(niche.id.clone()).or_default();

    let mut available: Vec<&String> = niche.topics.iter().filter(|t| !used.contains(*t)).collect();
    if available.is_empty() {
        info!(niche = %niche.id, "All topics used, starting a new pass");
        used.clear();
        available = niche.topics.iter().collect();
    }

    let chosen = available.choose(rng).map(|t| (*t).clone()).unwrap_or_default();
    used.insert(chosen.clone());
    chosen
}

/// Rotate through styles evenly.
pub fn pick_style<R: Rng + ?Sized>(state: &mut CalendarState, styles: &[Style], rng: &mut R) -> String {
    if state.style_cycle.is_empty() {
        let mut cycle = unique_ids(styles.iter().map(|s| s.id.as_str()));
        cycle.shuffle(rng);
        state.style_cycle = cycle.into();
    }
    state.style_cycle.pop_front().unwrap_or_default()
}

/// Select niche, topic and style for `today`, recording the post in `state`.
///
/// Both catalogs must be non-empty; `AppConfig::validate` guarantees this.
pub fn select<R: Rng + ?Sized>(
    state: &mut CalendarState,
    niches: &[Niche],
    styles: &[Style],
    today: &str,
    rng: &mut R,
) -> Selection {
    let niche_id = pick_niche(state, niches, rng);
    let topic = match niches.iter().find(|n| n.id == niche_id) {
        Some(niche) => pick_topic(state, niche, rng),
        None => {
            warn!(niche = %niche_id, "Selected niche missing from catalog");
            String::new()
        }
    };
    let style = pick_style(state, styles, rng);

    let entry = Selection {
        date: today.to_string(),
        niche: niche_id,
        topic,
        style,
    };
    state.posts.push(entry.clone());
    if state.posts.len() > MAX_POSTS {
        let excess = state.posts.len() - MAX_POSTS;
        state.posts.drain(..excess);
    }
    entry
}

/// Load the calendar, select today's content and persist the new state.
///
/// A failed read bootstraps from an empty calendar; a failed write is returned.
pub fn select_todays_content<S, R>(
    store: &S,
    niches: &[Niche],
    styles: &[Style],
    today: &str,
    rng: &mut R,
) -> Result<Selection, StoreError>
where
    S: DocumentStore,
    R: Rng + ?Sized,
{
    let mut state: CalendarState = store.load(CALENDAR_KEY);
    state.sanitize(niches, styles);

    let entry = select(&mut state, niches, styles, today, rng);
    store.save(CALENDAR_KEY, &state)?;

    info!(
        niche = %entry.niche,
        topic = %entry.topic,
        style = %entry.style,
        "Selected today's content"
    );
    Ok(entry)
}
