use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;

use crate::Wallpaper;

pub const MAX_HISTORY: usize = 50;

/// Uniform random pick. `None` for an empty slice.
pub fn pick_random<'a, R: Rng + ?Sized>(candidates: &'a [Wallpaper], rng: &mut R) -> Option<&'a Wallpaper> {
    candidates.choose(rng)
}

/// Bounded list of shown wallpapers with a back-navigation cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    entries: VecDeque<Wallpaper>,
    cursor: usize,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds history from persisted entries, keeping the newest
    /// `MAX_HISTORY`, with the cursor on the last one.
    pub fn from_entries(entries: Vec<Wallpaper>) -> Self {
        let mut history = Self::new();
        for wallpaper in entries {
            history.record_shown(wallpaper);
        }
        history
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn entries(&self) -> impl Iterator<Item = &Wallpaper> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<Wallpaper> {
        self.entries.iter().cloned().collect()
    }

    pub fn current(&self) -> Option<&Wallpaper> {
        self.entries.get(self.cursor)
    }

    /// Appends unless the newest entry has the same URL, trims the oldest
    /// entries past capacity, and moves the cursor to the newest entry.
    /// Returns whether an entry was appended.
    pub fn record_shown(&mut self, wallpaper: Wallpaper) -> bool {
        let duplicate = self.entries.back().map(|last| last.url == wallpaper.url).unwrap_or(false);
        if !duplicate {
            self.entries.push_back(wallpaper);
            while self.entries.len() > MAX_HISTORY {
                self.entries.pop_front();
            }
        }
        self.cursor = self.entries.len().saturating_sub(1);
        !duplicate
    }

    /// Steps the cursor back one entry. `None` at the oldest entry or when
    /// empty, with nothing changed.
    pub fn go_back(&mut self) -> Option<&Wallpaper> {
        if self.cursor == 0 || self.entries.is_empty() {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MediaKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn wallpaper(url: &str) -> Wallpaper {
        Wallpaper {
            url: url.to_string(),
            title: url.to_uppercase(),
            permalink: String::new(),
            author: String::new(),
            source: "EarthPorn".to_string(),
            resolution: None,
            kind: MediaKind::Image,
        }
    }

    #[test]
    fn pick_random_empty_and_single() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(pick_random(&[], &mut rng).is_none());
        let one = [wallpaper("a")];
        assert_eq!(pick_random(&one, &mut rng).map(|w| w.url.as_str()), Some("a"));
    }

    #[test]
    fn pick_random_reaches_every_candidate() {
        let mut rng = StdRng::seed_from_u64(42);
        let candidates: Vec<Wallpaper> = ["a", "b", "c"].iter().map(|u| wallpaper(u)).collect();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            if let Some(w) = pick_random(&candidates, &mut rng) {
                seen.insert(w.url.clone());
            }
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn consecutive_duplicates_are_not_appended() {
        let mut history = History::new();
        assert!(history.record_shown(wallpaper("a")));
        assert!(!history.record_shown(wallpaper("a")));
        assert_eq!(history.len(), 1);

        assert!(history.record_shown(wallpaper("b")));
        assert!(history.record_shown(wallpaper("a")));
        assert_eq!(history.len(), 3);

        let urls: Vec<&str> = history.entries().map(|w| w.url.as_str()).collect();
        for pair in urls.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn capacity_trims_the_front() {
        let mut history = History::new();
        for i in 0..(MAX_HISTORY + 7) {
            history.record_shown(wallpaper(&format!("u{}", i)));
        }
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history.entries().next().map(|w| w.url.as_str()), Some("u7"));
        assert_eq!(history.cursor(), MAX_HISTORY - 1);
    }

    #[test]
    fn go_back_walks_to_the_oldest_then_stops() {
        let mut history = History::from_entries(vec![wallpaper("a"), wallpaper("b"), wallpaper("c")]);
        assert_eq!(history.cursor(), 2);

        assert_eq!(history.go_back().map(|w| w.url.clone()), Some("b".to_string()));
        assert_eq!(history.go_back().map(|w| w.url.clone()), Some("a".to_string()));

        let before = history.clone();
        assert!(history.go_back().is_none());
        assert_eq!(history, before);
        assert_eq!(history.current().map(|w| w.url.as_str()), Some("a"));
    }

    #[test]
    fn go_back_on_empty_history() {
        let mut history = History::new();
        assert!(history.go_back().is_none());
        assert_eq!(history.cursor(), 0);
        assert!(history.current().is_none());
    }

    #[test]
    fn new_selection_after_going_back_resets_cursor_to_end() {
        let mut history = History::from_entries(vec![wallpaper("a"), wallpaper("b")]);
        history.go_back();
        assert_eq!(history.cursor(), 0);

        history.record_shown(wallpaper("c"));
        assert_eq!(history.cursor(), 2);
        assert_eq!(history.current().map(|w| w.url.as_str()), Some("c"));
    }

    #[test]
    fn reload_collapses_stored_duplicates() {
        let history = History::from_entries(vec![wallpaper("a"), wallpaper("a"), wallpaper("b")]);
        assert_eq!(history.len(), 2);
        assert_eq!(history.cursor(), 1);
    }
}
