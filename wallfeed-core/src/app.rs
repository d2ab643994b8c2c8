use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;

use crate::cache::{self, CacheKey};
use crate::database::{self, Favorite, LocalUpload};
use crate::filter::build_candidates;
use crate::history::{pick_random, History};
use crate::loader::{LoadState, LoadTracker};
use crate::request::{FeedClient, ImageProbe, ProbeOutcome};
use crate::schedule::resolve_source;
use crate::settings::{load_settings, parse_sources, settings_entry, Settings};
use crate::storage::KeyValueStore;
use crate::Wallpaper;

/// Where the selector draws candidates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidatePool {
    /// Cache backed feed pipeline.
    Remote,
    Favorites,
    Local,
}

impl CandidatePool {
    pub fn for_settings(settings: &Settings) -> Self {
        if settings.use_local_wallpapers {
            CandidatePool::Local
        } else if settings.favorites_only {
            CandidatePool::Favorites
        } else {
            CandidatePool::Remote
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    NoWallpapersFound,
    AllSourcesFailed,
    LoadFailed,
}

impl Notice {
    pub fn message(&self) -> &'static str {
        match self {
            Notice::NoWallpapersFound => "No wallpapers found. Try different sources or filters.",
            Notice::AllSourcesFailed => "Could not reach any source. Check your connection.",
            Notice::LoadFailed => "Multiple images failed to load. Try again later.",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Displayed {
        wallpaper: Wallpaper,
        /// False when the probe timed out and the URL is shown as is.
        verified: bool,
        /// The cache entry behind this wallpaper should be refetched.
        refresh_due: bool,
    },
    NoWallpapers(Notice),
    Failed {
        attempts: u32,
    },
}

impl LoadOutcome {
    pub fn wallpaper(&self) -> Option<&Wallpaper> {
        match self {
            LoadOutcome::Displayed { wallpaper, .. } => Some(wallpaper),
            _ => None,
        }
    }

    pub fn notice(&self) -> Option<Notice> {
        match self {
            LoadOutcome::Displayed { .. } => None,
            LoadOutcome::NoWallpapers(notice) => Some(*notice),
            LoadOutcome::Failed { .. } => Some(Notice::LoadFailed),
        }
    }

    pub fn refresh_due(&self) -> bool {
        matches!(self, LoadOutcome::Displayed { refresh_due: true, .. })
    }
}

/// Candidate list for one draw, with the notice to show if it is empty.
#[derive(Debug, Default)]
pub struct Candidates {
    pub wallpapers: Vec<Wallpaper>,
    pub notice: Option<Notice>,
}

/// One wallpaper session: settings, history and the lifecycle of the
/// wallpaper on screen, all backed by a single store.
pub struct Session {
    store: Box<dyn KeyValueStore>,
    client: FeedClient,
    probe: Box<dyn ImageProbe>,
    settings: Settings,
    history: History,
    tracker: LoadTracker,
    current: Option<Wallpaper>,
    rng: StdRng,
}

impl Session {
    pub fn new(store: Box<dyn KeyValueStore>, client: FeedClient, probe: Box<dyn ImageProbe>) -> Self {
        let settings = load_settings(store.as_ref());
        let history = database::load_history(store.as_ref());
        debug!("Session starts with {} history entries", history.len());

        Self {
            store,
            client,
            probe,
            settings,
            history,
            tracker: LoadTracker::default(),
            current: None,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn current(&self) -> Option<&Wallpaper> {
        self.current.as_ref()
    }

    pub fn state(&self) -> LoadState {
        self.tracker.state()
    }

    pub fn pool(&self) -> CandidatePool {
        CandidatePool::for_settings(&self.settings)
    }

    /// Sources queried at `now`, after schedule resolution.
    pub fn effective_sources(&self, now: DateTime<Local>) -> Vec<String> {
        let sources = parse_sources(&resolve_source(&self.settings, now.time()));
        if sources.is_empty() {
            self.settings.sources()
        } else {
            sources
        }
    }

    pub fn cache_key(&self, now: DateTime<Local>) -> CacheKey {
        CacheKey::new(&self.settings, &self.effective_sources(now))
    }

    /// Startup path: the last shown wallpaper if recent, then (remote pool
    /// only) any cached entry regardless of age, then a full draw.
    pub fn load_wallpaper(&mut self, now: DateTime<Local>) -> Result<LoadOutcome> {
        let blacklist = database::blacklist_set(self.store.as_ref());
        if let Some(previous) = database::load_current(self.store.as_ref(), now.timestamp_millis()) {
            if !blacklist.contains(&previous.url) {
                info!("Restoring current wallpaper {}", previous.url);
                let outcome = self.present(vec![previous], false, now)?;
                if outcome.wallpaper().is_some() {
                    return Ok(outcome);
                }
            }
        }

        if self.pool() != CandidatePool::Remote {
            return self.new_wallpaper(now);
        }

        let key = self.cache_key(now);
        if let Some(entry) = cache::get_stale(self.store.as_ref(), &key)? {
            let refresh_due = entry.needs_refresh(now.timestamp_millis());
            let wallpapers = without_blacklisted(entry.candidates, &blacklist);
            if !wallpapers.is_empty() {
                debug!("Showing cached candidates, refresh due: {}", refresh_due);
                let outcome = self.present(wallpapers, refresh_due, now)?;
                if outcome.wallpaper().is_some() {
                    return Ok(outcome);
                }
            }
        }

        self.new_wallpaper(now)
    }

    /// Draws a new wallpaper from the active pool with bounded retries.
    pub fn new_wallpaper(&mut self, now: DateTime<Local>) -> Result<LoadOutcome> {
        let Candidates { wallpapers, notice } = self.pool_candidates(now)?;
        if wallpapers.is_empty() {
            let notice = notice.unwrap_or(Notice::NoWallpapersFound);
            warn!("{}", notice.message());
            return Ok(LoadOutcome::NoWallpapers(notice));
        }
        self.present(wallpapers, false, now)
    }

    fn pool_candidates(&mut self, now: DateTime<Local>) -> Result<Candidates> {
        let blacklist = database::blacklist_set(self.store.as_ref());
        match self.pool() {
            CandidatePool::Local => {
                let uploads = database::load_uploads(self.store.as_ref())?;
                let wallpapers = without_blacklisted(uploads.iter().map(LocalUpload::to_wallpaper).collect(), &blacklist);
                if !wallpapers.is_empty() {
                    return Ok(Candidates { wallpapers, notice: None });
                }
                warn!("No local wallpapers, falling back to remote sources");
            }
            CandidatePool::Favorites => {
                let favorites = database::load_favorites(self.store.as_ref())?;
                let wallpapers = without_blacklisted(favorites.into_iter().map(|f| f.wallpaper).collect(), &blacklist);
                if !wallpapers.is_empty() {
                    return Ok(Candidates { wallpapers, notice: None });
                }
                warn!("No favorites yet, falling back to remote sources");
            }
            CandidatePool::Remote => {}
        }
        self.fetch_candidates(now)
    }

    /// Remote candidates: a fresh cache entry when there is one, otherwise a
    /// fetch that also refills the cache.
    pub fn fetch_candidates(&mut self, now: DateTime<Local>) -> Result<Candidates> {
        let key = self.cache_key(now);
        let blacklist = database::blacklist_set(self.store.as_ref());

        if let Some(entry) = cache::get_fresh(self.store.as_ref(), &key, now.timestamp_millis())? {
            let wallpapers = without_blacklisted(entry.candidates, &blacklist);
            if !wallpapers.is_empty() {
                debug!("Using {} cached candidates", wallpapers.len());
                return Ok(Candidates { wallpapers, notice: None });
            }
            info!("Every cached candidate is blacklisted, refetching");
            cache::remove(self.store.as_mut(), &key)?;
        }

        self.refetch(&key, &blacklist, now)
    }

    /// Unconditional refetch of the current cache entry. Returns the number
    /// of candidates stored.
    pub fn refresh_cache(&mut self, now: DateTime<Local>) -> Result<usize> {
        let key = self.cache_key(now);
        let blacklist = database::blacklist_set(self.store.as_ref());
        info!("Refreshing cache for {}", key.sources.join(","));
        Ok(self.refetch(&key, &blacklist, now)?.wallpapers.len())
    }

    fn refetch(&mut self, key: &CacheKey, blacklist: &HashSet<String>, now: DateTime<Local>) -> Result<Candidates> {
        let batch = self.client.fetch_raw(&key.sources, &self.settings);
        let mut wallpapers = build_candidates(&batch.items, &self.settings, blacklist);
        wallpapers.shuffle(&mut self.rng);
        info!(
            "{} candidates from {} posts across {} sources",
            wallpapers.len(),
            batch.items.len(),
            batch.attempted
        );

        cache::put(self.store.as_mut(), key, &wallpapers, now.timestamp_millis())?;

        let notice = if !wallpapers.is_empty() {
            None
        } else if batch.all_failed() {
            Some(Notice::AllSourcesFailed)
        } else {
            Some(Notice::NoWallpapersFound)
        };
        Ok(Candidates { wallpapers, notice })
    }

    /// Runs the retry loop over `wallpapers`, drawing at random and dropping
    /// each candidate that fails to load.
    fn present(&mut self, mut wallpapers: Vec<Wallpaper>, refresh_due: bool, now: DateTime<Local>) -> Result<LoadOutcome> {
        let probe = self.probe.as_ref();
        let rng = &mut self.rng;
        let mut chosen = None;

        let state = self.tracker.drive(|attempt| {
            let picked = pick_random(&wallpapers, rng)?.clone();
            wallpapers.retain(|w| w.url != picked.url);
            debug!("Attempt {}: loading {}", attempt + 1, picked.url);
            let outcome = probe.probe(&picked.url);
            if outcome != ProbeOutcome::Failed {
                chosen = Some(picked);
            }
            Some(outcome)
        });

        match (state, chosen) {
            (LoadState::Displayed, Some(wallpaper)) => {
                self.show(wallpaper.clone(), now)?;
                Ok(LoadOutcome::Displayed {
                    wallpaper,
                    verified: self.tracker.verified(),
                    refresh_due,
                })
            }
            _ => Ok(LoadOutcome::Failed {
                attempts: self.tracker.failures(),
            }),
        }
    }

    /// Records `wallpaper` in history and as the current snapshot with one
    /// store write. Nothing changes in memory if that write fails.
    fn show(&mut self, wallpaper: Wallpaper, now: DateTime<Local>) -> Result<()> {
        info!("Showing {} ({})", wallpaper.attribution(), wallpaper.url);
        let mut history = self.history.clone();
        history.record_shown(wallpaper.clone());
        let set = vec![
            database::history_entry(&history)?,
            database::current_entry(&wallpaper, now.timestamp_millis())?,
        ];
        if let Err(e) = self.store.write(set, Vec::new()) {
            error!("Failed to save shown wallpaper: {}", e);
            return Err(e).context("Failed to save shown wallpaper");
        }
        self.history = history;
        self.current = Some(wallpaper);
        Ok(())
    }

    /// Steps back through history. `None` at the oldest entry.
    pub fn go_back(&mut self, now: DateTime<Local>) -> Result<Option<Wallpaper>> {
        let Some(previous) = self.history.go_back().cloned() else {
            debug!("Already at the oldest wallpaper");
            return Ok(None);
        };
        database::save_current(self.store.as_mut(), &previous, now.timestamp_millis())?;
        self.current = Some(previous.clone());
        Ok(Some(previous))
    }

    /// Favorites or un-favorites the wallpaper on screen. `None` when
    /// nothing is shown, otherwise whether it is now a favorite.
    pub fn toggle_favorite(&mut self, now: DateTime<Local>) -> Result<Option<bool>> {
        let Some(current) = self.current.clone() else {
            return Ok(None);
        };
        let added = database::toggle_favorite(self.store.as_mut(), &current, now.timestamp_millis())?;
        info!("{} favorites: {}", if added { "Added to" } else { "Removed from" }, current.url);
        Ok(Some(added))
    }

    pub fn is_favorited(&self, url: &str) -> Result<bool> {
        database::is_favorited(self.store.as_ref(), url)
    }

    /// Blacklists the wallpaper on screen and draws a replacement.
    pub fn blacklist_current(&mut self, now: DateTime<Local>) -> Result<Option<LoadOutcome>> {
        let Some(current) = self.current.clone() else {
            return Ok(None);
        };
        let set: Vec<_> = database::blacklist_entry(self.store.as_ref(), &current.url)?
            .into_iter()
            .collect();
        self.store
            .write(set, vec![database::CURRENT_WALLPAPER_KEY.to_string()])
            .context("Failed to blacklist current wallpaper")?;
        info!("Blacklisted {}", current.url);
        self.current = None;
        self.new_wallpaper(now).map(Some)
    }

    pub fn unblacklist(&mut self, url: &str) -> Result<bool> {
        database::remove_from_blacklist(self.store.as_mut(), url)
    }

    pub fn clear_blacklist(&mut self) -> Result<()> {
        database::clear_blacklist(self.store.as_mut())
    }

    pub fn blacklist(&self) -> Result<Vec<String>> {
        database::load_blacklist(self.store.as_ref())
    }

    pub fn favorites(&self) -> Result<Vec<Favorite>> {
        database::load_favorites(self.store.as_ref())
    }

    pub fn remove_favorite(&mut self, url: &str) -> Result<bool> {
        database::remove_favorite(self.store.as_mut(), url)
    }

    pub fn recent_sources(&self) -> Result<Vec<String>> {
        database::load_recent_sources(self.store.as_ref())
    }

    pub fn uploads(&self) -> Result<Vec<LocalUpload>> {
        database::load_uploads(self.store.as_ref())
    }

    pub fn add_upload(&mut self, name: &str, data: &str, now: DateTime<Local>) -> Result<()> {
        database::add_upload(self.store.as_mut(), name, data, now.timestamp_millis())
    }

    pub fn remove_upload(&mut self, name: &str) -> Result<bool> {
        database::remove_upload(self.store.as_mut(), name)
    }

    /// Persists new settings and drops every cache entry and the current
    /// snapshot so the next load fetches under the new filters. One store
    /// write; on failure the session keeps its old settings.
    pub fn apply_settings(&mut self, settings: Settings) -> Result<()> {
        let set = vec![
            settings_entry(&settings)?,
            database::recent_sources_entry(self.store.as_ref(), &settings.sources())?,
        ];
        let mut remove = cache::keys(self.store.as_ref(), None)?;
        remove.push(database::CURRENT_WALLPAPER_KEY.to_string());
        let cleared = remove.len() - 1;
        if let Err(e) = self.store.write(set, remove) {
            error!("Failed to apply settings: {}", e);
            return Err(e).context("Failed to apply settings");
        }
        info!(
            "Settings applied, sources: {}, {} cache entries cleared",
            settings.subreddit, cleared
        );
        self.settings = settings;
        Ok(())
    }

    pub fn clear_cache(&mut self) -> Result<usize> {
        cache::clear(self.store.as_mut(), None)
    }

    pub fn cached_wallpapers(&self) -> Result<Vec<Wallpaper>> {
        cache::all_cached(self.store.as_ref())
    }
}

fn without_blacklisted(wallpapers: Vec<Wallpaper>, blacklist: &HashSet<String>) -> Vec<Wallpaper> {
    wallpapers.into_iter().filter(|w| !blacklist.contains(&w.url)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{FeedError, FeedTransport};
    use crate::settings::SETTINGS_KEY;
    use crate::storage::{MemoryStore, StoreError};
    use crate::MediaKind;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Pages {
        bodies: Rc<RefCell<Vec<(String, String)>>>,
        requests: Rc<RefCell<Vec<String>>>,
    }

    impl Pages {
        fn serve(&self, source: &str, body: String) {
            self.bodies.borrow_mut().push((format!("/r/{}/", source), body));
        }

        fn request_count(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    impl FeedTransport for Pages {
        fn get_text(&self, url: &str) -> Result<String, FeedError> {
            self.requests.borrow_mut().push(url.to_string());
            self.bodies
                .borrow()
                .iter()
                .find(|(path, _)| url.contains(path.as_str()))
                .map(|(_, body)| body.clone())
                .ok_or(FeedError::Status(404))
        }
    }

    #[derive(Clone, Default)]
    struct Probe {
        failing: Rc<RefCell<HashSet<String>>>,
        probed: Rc<RefCell<Vec<String>>>,
    }

    impl ImageProbe for Probe {
        fn probe(&self, url: &str) -> ProbeOutcome {
            self.probed.borrow_mut().push(url.to_string());
            if self.failing.borrow().contains(url) {
                ProbeOutcome::Failed
            } else {
                ProbeOutcome::Loaded
            }
        }
    }

    /// Store shared between sessions that can be told to refuse writes
    /// touching one key.
    #[derive(Clone, Default)]
    struct SharedStore {
        inner: Rc<RefCell<MemoryStore>>,
        refused_key: Rc<RefCell<Option<String>>>,
    }

    impl SharedStore {
        fn refuse(&self, key: &str) {
            *self.refused_key.borrow_mut() = Some(key.to_string());
        }

        fn has(&self, key: &str) -> bool {
            self.inner.borrow().get(key).unwrap().is_some()
        }
    }

    impl KeyValueStore for SharedStore {
        fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
            self.inner.borrow().get(key)
        }

        fn keys(&self) -> Result<Vec<String>, StoreError> {
            self.inner.borrow().keys()
        }

        fn write(&mut self, set: Vec<(String, Value)>, remove: Vec<String>) -> Result<(), StoreError> {
            if let Some(refused) = self.refused_key.borrow().as_deref() {
                if set.iter().any(|(k, _)| k == refused) || remove.iter().any(|k| k == refused) {
                    return Err(StoreError::Write {
                        path: "shared".into(),
                        source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                    });
                }
            }
            self.inner.borrow_mut().write(set, remove)
        }
    }

    fn image(id: &str) -> Value {
        json!({
            "url": format!("https://i.redd.it/{}.jpg", id),
            "title": format!("Mountain {} [3840x2160]", id),
            "author": "someone",
            "permalink": format!("/r/EarthPorn/comments/{}/", id),
            "post_hint": "image",
            "score": 100,
            "preview": { "images": [{ "source": { "url": "https://preview.redd.it/p.jpg", "width": 3840, "height": 2160 } }] }
        })
    }

    fn listing(posts: Vec<Value>) -> String {
        let children: Vec<Value> = posts.into_iter().map(|p| json!({ "kind": "t3", "data": p })).collect();
        json!({ "data": { "children": children } }).to_string()
    }

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, h, m, 0).single().unwrap()
    }

    fn session(pages: &Pages, probe: &Probe) -> Session {
        Session::new(
            Box::new(MemoryStore::new()),
            FeedClient::new(Box::new(pages.clone())),
            Box::new(probe.clone()),
        )
        .with_rng(StdRng::seed_from_u64(7))
    }

    fn shared_session(store: &SharedStore, pages: &Pages, probe: &Probe, seed: u64) -> Session {
        Session::new(
            Box::new(store.clone()),
            FeedClient::new(Box::new(pages.clone())),
            Box::new(probe.clone()),
        )
        .with_rng(StdRng::seed_from_u64(seed))
    }

    #[test]
    fn candidate_pool_precedence() {
        let mut settings = Settings::default();
        assert_eq!(CandidatePool::for_settings(&settings), CandidatePool::Remote);
        settings.favorites_only = true;
        assert_eq!(CandidatePool::for_settings(&settings), CandidatePool::Favorites);
        settings.use_local_wallpapers = true;
        assert_eq!(CandidatePool::for_settings(&settings), CandidatePool::Local);
    }

    #[test]
    fn new_wallpaper_fetches_caches_and_records_history() {
        let pages = Pages::default();
        pages.serve("EarthPorn", listing(vec![image("a"), image("b")]));
        let probe = Probe::default();
        let mut session = session(&pages, &probe);

        let outcome = session.new_wallpaper(at(12, 0)).unwrap();
        let shown = outcome.wallpaper().cloned().unwrap();
        assert_eq!(shown.kind, MediaKind::Image);
        assert!(shown.title.starts_with("Mountain "));
        assert!(!shown.title.contains("3840"));
        assert_eq!(session.current(), Some(&shown));
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.state(), LoadState::Displayed);

        session.new_wallpaper(at(12, 5)).unwrap();
        assert_eq!(pages.request_count(), 1);
        assert_eq!(session.cached_wallpapers().unwrap().len(), 2);
    }

    #[test]
    fn failing_candidates_are_dropped_until_one_loads() {
        let pages = Pages::default();
        pages.serve("EarthPorn", listing(vec![image("a"), image("b"), image("c")]));
        let probe = Probe::default();
        probe.failing.borrow_mut().insert("https://i.redd.it/a.jpg".to_string());
        probe.failing.borrow_mut().insert("https://i.redd.it/b.jpg".to_string());
        let mut session = session(&pages, &probe);

        let outcome = session.new_wallpaper(at(12, 0)).unwrap();
        assert_eq!(outcome.wallpaper().map(|w| w.url.as_str()), Some("https://i.redd.it/c.jpg"));
        let probed = probe.probed.borrow();
        let unique: HashSet<&String> = probed.iter().collect();
        assert_eq!(unique.len(), probed.len());
    }

    #[test]
    fn nothing_loads_reports_failed() {
        let pages = Pages::default();
        pages.serve("EarthPorn", listing(vec![image("a")]));
        let probe = Probe::default();
        probe.failing.borrow_mut().insert("https://i.redd.it/a.jpg".to_string());
        let mut session = session(&pages, &probe);

        let outcome = session.new_wallpaper(at(12, 0)).unwrap();
        assert_eq!(outcome, LoadOutcome::Failed { attempts: 1 });
        assert_eq!(outcome.notice(), Some(Notice::LoadFailed));
        assert_eq!(session.state(), LoadState::Failed);
        assert!(session.current().is_none());
    }

    #[test]
    fn unreachable_sources_surface_a_notice_and_cache_nothing() {
        let pages = Pages::default();
        let probe = Probe::default();
        let mut session = session(&pages, &probe);

        let outcome = session.new_wallpaper(at(12, 0)).unwrap();
        assert_eq!(outcome, LoadOutcome::NoWallpapers(Notice::AllSourcesFailed));
        assert!(session.cached_wallpapers().unwrap().is_empty());

        pages.serve("EarthPorn", listing(vec![json!({ "title": "text only", "is_self": true })]));
        let outcome = session.new_wallpaper(at(12, 1)).unwrap();
        assert_eq!(outcome, LoadOutcome::NoWallpapers(Notice::NoWallpapersFound));
    }

    #[test]
    fn blacklisting_draws_a_replacement_and_skips_cached_url() {
        let pages = Pages::default();
        pages.serve("EarthPorn", listing(vec![image("a"), image("b")]));
        let probe = Probe::default();
        let mut session = session(&pages, &probe);

        let first = session.new_wallpaper(at(12, 0)).unwrap().wallpaper().cloned().unwrap();
        let replacement = session.blacklist_current(at(12, 1)).unwrap().unwrap();
        let second = replacement.wallpaper().cloned().unwrap();
        assert_ne!(first.url, second.url);
        assert_eq!(session.blacklist().unwrap(), vec![first.url.clone()]);

        for minute in 2..10 {
            let outcome = session.new_wallpaper(at(12, minute)).unwrap();
            assert_ne!(outcome.wallpaper().map(|w| w.url.clone()), Some(first.url.clone()));
        }
    }

    #[test]
    fn fully_blacklisted_cache_forces_one_refetch() {
        let pages = Pages::default();
        pages.serve("EarthPorn", listing(vec![image("a")]));
        let probe = Probe::default();
        let mut session = session(&pages, &probe);

        session.new_wallpaper(at(12, 0)).unwrap();
        session.blacklist_current(at(12, 1)).unwrap();
        // The blacklist call already triggered the refetch.
        assert_eq!(pages.request_count(), 2);
        assert!(session.current().is_none());
    }

    #[test]
    fn load_wallpaper_uses_stale_cache_and_flags_refresh() {
        let pages = Pages::default();
        pages.serve("EarthPorn", listing(vec![image("a"), image("b")]));
        let probe = Probe::default();
        let mut session = session(&pages, &probe);
        session.refresh_cache(at(10, 0)).unwrap();

        let outcome = session.load_wallpaper(at(10, 20)).unwrap();
        assert!(outcome.refresh_due());
        assert_eq!(pages.request_count(), 1);

        let outcome = session.load_wallpaper(at(10, 25)).unwrap();
        assert!(outcome.wallpaper().is_some());
        assert_eq!(outcome.wallpaper(), session.current());
    }

    #[test]
    fn go_back_walks_history() {
        let pages = Pages::default();
        pages.serve("EarthPorn", listing(vec![image("a"), image("b"), image("c")]));
        let probe = Probe::default();
        let mut session = session(&pages, &probe);

        let mut shown = Vec::new();
        for minute in 0..6 {
            if let Some(w) = session.new_wallpaper(at(12, minute)).unwrap().wallpaper() {
                shown.push(w.url.clone());
            }
        }
        shown.dedup();
        let history: Vec<String> = session.history().entries().map(|w| w.url.clone()).collect();
        assert_eq!(history, shown);

        if history.len() > 1 {
            let back = session.go_back(at(12, 10)).unwrap().unwrap();
            assert_eq!(back.url, history[history.len() - 2]);
            assert_eq!(session.current(), Some(&back));
        }
    }

    #[test]
    fn apply_settings_clears_cache_and_updates_recents() {
        let pages = Pages::default();
        pages.serve("EarthPorn", listing(vec![image("a")]));
        pages.serve("SpacePorn", listing(vec![image("s")]));
        let probe = Probe::default();
        let mut session = session(&pages, &probe);
        session.new_wallpaper(at(12, 0)).unwrap();
        assert_eq!(session.cached_wallpapers().unwrap().len(), 1);

        let settings = Settings {
            subreddit: "SpacePorn, CityPorn".to_string(),
            ..Settings::default()
        };
        session.apply_settings(settings).unwrap();
        assert!(session.cached_wallpapers().unwrap().is_empty());
        assert_eq!(
            session.recent_sources().unwrap(),
            vec!["CityPorn", "SpacePorn", "EarthPorn", "ArtPorn"]
        );
        assert_eq!(session.effective_sources(at(12, 0)), vec!["SpacePorn", "CityPorn"]);
    }

    #[test]
    fn favorites_pool_falls_back_when_empty() {
        let pages = Pages::default();
        pages.serve("EarthPorn", listing(vec![image("a")]));
        let probe = Probe::default();
        let mut session = session(&pages, &probe);
        session
            .apply_settings(Settings {
                favorites_only: true,
                ..Settings::default()
            })
            .unwrap();

        let outcome = session.new_wallpaper(at(12, 0)).unwrap();
        assert!(outcome.wallpaper().is_some());
        assert_eq!(session.toggle_favorite(at(12, 1)).unwrap(), Some(true));

        let requests = pages.request_count();
        session.new_wallpaper(at(12, 2)).unwrap();
        assert_eq!(pages.request_count(), requests);
        assert_eq!(session.favorites().unwrap().len(), 1);
    }

    #[test]
    fn local_uploads_become_candidates() {
        let pages = Pages::default();
        let probe = Probe::default();
        let mut session = session(&pages, &probe);
        session
            .apply_settings(Settings {
                use_local_wallpapers: true,
                ..Settings::default()
            })
            .unwrap();
        session.add_upload("beach.png", "data:image/png;base64,AAAA", at(9, 0)).unwrap();

        let outcome = session.load_wallpaper(at(12, 0)).unwrap();
        let shown = outcome.wallpaper().unwrap();
        assert_eq!(shown.source, "local");
        assert_eq!(shown.title, "beach.png");
        assert_eq!(pages.request_count(), 0);
    }

    #[test]
    fn refused_snapshot_write_leaves_history_untouched() {
        let pages = Pages::default();
        pages.serve("EarthPorn", listing(vec![image("a"), image("b")]));
        let probe = Probe::default();
        let store = SharedStore::default();
        store.refuse(database::CURRENT_WALLPAPER_KEY);
        let mut session = shared_session(&store, &pages, &probe, 7);

        assert!(session.new_wallpaper(at(12, 0)).is_err());
        assert!(session.history().is_empty());
        assert!(session.current().is_none());
        assert!(!store.has(database::HISTORY_KEY));
        assert!(!store.has(database::CURRENT_WALLPAPER_KEY));
    }

    #[test]
    fn refused_settings_write_applies_nothing() {
        let pages = Pages::default();
        pages.serve("EarthPorn", listing(vec![image("a")]));
        let probe = Probe::default();
        let store = SharedStore::default();
        let mut session = shared_session(&store, &pages, &probe, 7);
        session.new_wallpaper(at(12, 0)).unwrap();
        store.refuse(database::CURRENT_WALLPAPER_KEY);

        let settings = Settings {
            subreddit: "SpacePorn".to_string(),
            ..Settings::default()
        };
        assert!(session.apply_settings(settings).is_err());
        assert_eq!(session.settings().subreddit, "EarthPorn");
        assert!(!store.has(SETTINGS_KEY));
        assert_eq!(session.cached_wallpapers().unwrap().len(), 1);
        assert_eq!(
            session.recent_sources().unwrap(),
            vec!["EarthPorn", "SpacePorn", "ArtPorn"]
        );
    }

    #[test]
    fn local_pool_restores_the_last_shown_upload() {
        let pages = Pages::default();
        let probe = Probe::default();
        let store = SharedStore::default();
        let mut first = shared_session(&store, &pages, &probe, 7);
        first
            .apply_settings(Settings {
                use_local_wallpapers: true,
                ..Settings::default()
            })
            .unwrap();
        for i in 0..5 {
            let data = format!("data:image/png;base64,AAA{}", i);
            first.add_upload(&format!("upload{}.png", i), &data, at(9, 0)).unwrap();
        }
        let shown = first.load_wallpaper(at(12, 0)).unwrap().wallpaper().cloned().unwrap();

        for seed in 0..10 {
            let mut next = shared_session(&store, &pages, &probe, seed);
            let restored = next.load_wallpaper(at(12, 10)).unwrap();
            assert_eq!(restored.wallpaper().map(|w| w.url.as_str()), Some(shown.url.as_str()));
        }
        assert_eq!(pages.request_count(), 0);
    }
}
