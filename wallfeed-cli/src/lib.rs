pub use crate::app::{parse_schedule_rule, SettingsUpdate, WallfeedCliApp};

mod app {
    use anyhow::{bail, Context, Result};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use chrono::{Local, TimeZone};
    use log::{info, warn};
    use std::io::{self, Write};
    use std::path::{Path, PathBuf};
    use std::thread;
    use std::time::Duration;
    use wallfeed_core::schedule::parse_clock;
    use wallfeed_core::settings::{ColorFilter, ScheduleRule, Sort, TimeWindow};
    use wallfeed_core::*;

    /// Settings changes given on the command line. Unset fields keep their
    /// stored value.
    #[derive(Debug, Default, Clone, clap::Args)]
    pub struct SettingsUpdate {
        /// Comma separated sources, e.g. "EarthPorn, r/SpacePorn"
        #[arg(long)]
        pub subreddit: Option<String>,
        /// hot, new, top, rising or controversial
        #[arg(long)]
        pub sort: Option<Sort>,
        /// hour, day, week, month, year or all (top/controversial only)
        #[arg(long)]
        pub time: Option<TimeWindow>,
        /// Minimum width in pixels, 0 to disable
        #[arg(long)]
        pub min_resolution: Option<u32>,
        #[arg(long)]
        pub nsfw: Option<bool>,
        #[arg(long)]
        pub images: Option<bool>,
        #[arg(long)]
        pub gifs: Option<bool>,
        #[arg(long)]
        pub videos: Option<bool>,
        #[arg(long)]
        pub favorites_only: Option<bool>,
        #[arg(long)]
        pub local: Option<bool>,
        #[arg(long)]
        pub color: Option<ColorFilter>,
        #[arg(long)]
        pub min_score: Option<i64>,
        /// Slideshow interval in minutes, 0 to disable
        #[arg(long)]
        pub interval: Option<u32>,
        #[arg(long)]
        pub scheduled: Option<bool>,
        /// Replaces the schedule; repeat for several rules, e.g. "22:00-06:00=SpacePorn"
        #[arg(long = "schedule", value_parser = parse_schedule_rule)]
        pub schedules: Vec<ScheduleRule>,
    }

    impl SettingsUpdate {
        pub fn is_empty(&self) -> bool {
            self.subreddit.is_none()
                && self.sort.is_none()
                && self.time.is_none()
                && self.min_resolution.is_none()
                && self.nsfw.is_none()
                && self.images.is_none()
                && self.gifs.is_none()
                && self.videos.is_none()
                && self.favorites_only.is_none()
                && self.local.is_none()
                && self.color.is_none()
                && self.min_score.is_none()
                && self.interval.is_none()
                && self.scheduled.is_none()
                && self.schedules.is_empty()
        }

        pub fn apply_to(&self, settings: &Settings) -> Settings {
            let mut next = settings.clone();
            if let Some(ref subreddit) = self.subreddit {
                next.subreddit = subreddit.clone();
            }
            if let Some(sort) = self.sort {
                next.sort = sort;
            }
            if let Some(time) = self.time {
                next.time = time;
            }
            if let Some(min_resolution) = self.min_resolution {
                next.min_resolution = min_resolution;
            }
            if let Some(nsfw) = self.nsfw {
                next.allow_nsfw = nsfw;
            }
            if let Some(images) = self.images {
                next.allow_images = images;
            }
            if let Some(gifs) = self.gifs {
                next.allow_gifs = gifs;
            }
            if let Some(videos) = self.videos {
                next.allow_videos = videos;
            }
            if let Some(favorites_only) = self.favorites_only {
                next.favorites_only = favorites_only;
            }
            if let Some(local) = self.local {
                next.use_local_wallpapers = local;
            }
            if let Some(color) = self.color {
                next.color_filter = color;
            }
            if let Some(min_score) = self.min_score {
                next.min_score = min_score;
            }
            if let Some(interval) = self.interval {
                next.slideshow_interval = interval;
            }
            if let Some(scheduled) = self.scheduled {
                next.scheduled_enabled = scheduled;
            }
            if !self.schedules.is_empty() {
                next.schedules = self.schedules.clone();
            }
            next
        }
    }

    /// Parses `HH:MM-HH:MM=source`.
    pub fn parse_schedule_rule(value: &str) -> Result<ScheduleRule, String> {
        let (window, source) = value
            .split_once('=')
            .ok_or_else(|| format!("expected START-END=SOURCE, got '{}'", value))?;
        let (start, end) = window
            .split_once('-')
            .ok_or_else(|| format!("expected START-END, got '{}'", window))?;
        for clock in [start, end] {
            if parse_clock(clock).is_none() {
                return Err(format!("invalid time '{}', expected HH:MM", clock.trim()));
            }
        }
        if source.trim().is_empty() {
            return Err("schedule source is empty".to_string());
        }

        Ok(ScheduleRule {
            start_time: start.trim().to_string(),
            end_time: end.trim().to_string(),
            source: source.trim().to_string(),
        })
    }

    fn mime_type(path: &Path) -> Option<&'static str> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some("image/jpeg"),
            "png" => Some("image/png"),
            "gif" => Some("image/gif"),
            "webp" => Some("image/webp"),
            "mp4" => Some("video/mp4"),
            "webm" => Some("video/webm"),
            _ => None,
        }
    }

    fn data_url(path: &Path) -> Result<String> {
        let mime = mime_type(path).with_context(|| format!("Unsupported file type: {}", path.display()))?;
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
    }

    fn print_wallpaper(wallpaper: &Wallpaper) {
        println!("{}", wallpaper.attribution());
        let resolution = wallpaper
            .resolution
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown size".to_string());
        println!("r/{} | {} | {}", wallpaper.source, wallpaper.kind, resolution);
        if wallpaper.url.starts_with("data:") {
            println!("(local upload)");
        } else {
            println!("{}", wallpaper.url);
        }
        if !wallpaper.permalink.is_empty() {
            println!("{}", wallpaper.permalink);
        }
    }

    pub struct WallfeedCliApp {
        config: Config,
        session: Session,
    }

    impl WallfeedCliApp {
        pub fn new(store_file: Option<PathBuf>) -> Result<Self> {
            let config = match store_file {
                Some(path) => Config::with_store_file(path)?,
                None => Config::new()?,
            };
            let store = config.open_store()?;
            let session = Session::new(Box::new(store), FeedClient::http(), Box::new(HttpProbe::default()));

            Ok(Self { config, session })
        }

        pub fn config(&self) -> &Config {
            &self.config
        }

        fn report(&mut self, outcome: &LoadOutcome) -> Result<()> {
            match outcome {
                LoadOutcome::Displayed { wallpaper, verified, .. } => {
                    print_wallpaper(wallpaper);
                    if !verified {
                        println!("(loading timed out, showing the link as is)");
                    }
                }
                other => {
                    if let Some(notice) = other.notice() {
                        println!("{}", notice.message());
                    }
                }
            }

            if outcome.refresh_due() {
                let count = self.session.refresh_cache(Local::now())?;
                info!("Background refresh stored {} candidates", count);
            }
            Ok(())
        }

        /// Startup path: restores or picks a wallpaper and refreshes an aging
        /// cache afterwards.
        pub fn show(&mut self) -> Result<()> {
            let outcome = self.session.load_wallpaper(Local::now())?;
            self.report(&outcome)
        }

        pub fn next_wallpaper(&mut self) -> Result<()> {
            let outcome = self.session.new_wallpaper(Local::now())?;
            self.report(&outcome)
        }

        pub fn previous_wallpaper(&mut self) -> Result<()> {
            match self.session.go_back(Local::now())? {
                Some(wallpaper) => print_wallpaper(&wallpaper),
                None => println!("No earlier wallpaper in history."),
            }
            Ok(())
        }

        /// Commands that act on "the current wallpaper" run in a fresh
        /// process, so fall back to the stored one.
        fn ensure_current(&mut self) -> Result<bool> {
            if self.session.current().is_some() {
                return Ok(true);
            }
            let outcome = self.session.load_wallpaper(Local::now())?;
            Ok(outcome.wallpaper().is_some())
        }

        pub fn toggle_favorite(&mut self) -> Result<()> {
            if !self.ensure_current()? {
                println!("No wallpaper to favorite.");
                return Ok(());
            }
            match self.session.toggle_favorite(Local::now())? {
                Some(true) => println!("Added to favorites."),
                Some(false) => println!("Removed from favorites."),
                None => println!("No wallpaper to favorite."),
            }
            Ok(())
        }

        pub fn blacklist_current(&mut self) -> Result<()> {
            if !self.ensure_current()? {
                println!("No wallpaper to blacklist.");
                return Ok(());
            }
            if let Some(url) = self.session.current().map(|w| w.url.clone()) {
                println!("Blacklisted: {}", url);
            }
            match self.session.blacklist_current(Local::now())? {
                Some(outcome) => self.report(&outcome),
                None => Ok(()),
            }
        }

        pub fn unblacklist(&mut self, url: &str) -> Result<()> {
            if self.session.unblacklist(url)? {
                println!("Removed from blacklist: {}", url);
            } else {
                println!("Not blacklisted: {}", url);
            }
            Ok(())
        }

        pub fn clear_blacklist(&mut self) -> Result<()> {
            self.session.clear_blacklist()?;
            println!("Blacklist cleared.");
            Ok(())
        }

        pub fn list_favorites(&self) -> Result<()> {
            let favorites = self.session.favorites()?;
            if favorites.is_empty() {
                println!("No favorites yet.");
            }
            for (i, favorite) in favorites.iter().enumerate() {
                let saved = Local
                    .timestamp_millis_opt(favorite.saved_at)
                    .single()
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("{:>3}. {} [{}]", i + 1, favorite.wallpaper.attribution(), saved);
                println!("     {}", favorite.wallpaper.url);
            }
            Ok(())
        }

        pub fn remove_favorite(&mut self, url: &str) -> Result<()> {
            if self.session.remove_favorite(url)? {
                println!("Removed from favorites: {}", url);
            } else {
                println!("Not a favorite: {}", url);
            }
            Ok(())
        }

        pub fn list_blacklisted(&self) -> Result<()> {
            let blacklist = self.session.blacklist()?;
            if blacklist.is_empty() {
                println!("Blacklist is empty.");
            }
            for url in blacklist {
                println!("{}", url);
            }
            Ok(())
        }

        pub fn list_cached(&self) -> Result<()> {
            let cached = self.session.cached_wallpapers()?;
            println!("{} cached wallpapers", cached.len());
            for wallpaper in cached {
                println!("- {} ({})", wallpaper.attribution(), wallpaper.url);
            }
            Ok(())
        }

        pub fn clear_cache(&mut self) -> Result<()> {
            let removed = self.session.clear_cache()?;
            println!("Cleared {} cache entries.", removed);
            Ok(())
        }

        pub fn list_recent(&self) -> Result<()> {
            for source in self.session.recent_sources()? {
                println!("r/{}", source);
            }
            Ok(())
        }

        pub fn update_settings(&mut self, update: &SettingsUpdate) -> Result<()> {
            if !update.is_empty() {
                let next = update.apply_to(self.session.settings());
                self.session.apply_settings(next)?;
                println!("Settings saved. Cache cleared.");
            }
            let settings = self.session.settings();
            println!(
                "{}",
                serde_json::to_string_pretty(settings).context("Failed to format settings")?
            );
            Ok(())
        }

        pub fn open_post(&mut self) -> Result<()> {
            if !self.ensure_current()? {
                println!("No wallpaper shown.");
                return Ok(());
            }
            match self.session.current().map(|w| w.permalink.clone()) {
                Some(permalink) if !permalink.is_empty() => {
                    open::that(&permalink).with_context(|| format!("Failed to open {}", permalink))?;
                    println!("Opened {}", permalink);
                }
                _ => println!("This wallpaper has no post link."),
            }
            Ok(())
        }

        pub fn download(&mut self) -> Result<()> {
            if !self.ensure_current()? {
                println!("No wallpaper shown.");
                return Ok(());
            }
            match self.session.current().map(|w| w.url.clone()) {
                Some(url) if !url.starts_with("data:") => {
                    open::that(&url).with_context(|| format!("Failed to open {}", url))?;
                    println!("Opened {} for saving", url);
                }
                _ => println!("Local uploads are already on this machine."),
            }
            Ok(())
        }

        pub fn upload(&mut self, path: &Path) -> Result<()> {
            let data = data_url(path)?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .context("Upload path has no file name")?
                .to_string();
            self.session.add_upload(&name, &data, Local::now())?;
            println!("Added {}", name);
            if !self.session.settings().use_local_wallpapers {
                println!("Enable local wallpapers with `wallfeed settings --local true`.");
            }
            Ok(())
        }

        pub fn list_uploads(&self) -> Result<()> {
            let uploads = self.session.uploads()?;
            if uploads.is_empty() {
                println!("No local wallpapers.");
            }
            for upload in uploads {
                println!("{} ({} bytes encoded)", upload.name, upload.data.len());
            }
            Ok(())
        }

        pub fn remove_upload(&mut self, name: &str) -> Result<()> {
            if self.session.remove_upload(name)? {
                println!("Removed {}", name);
            } else {
                println!("No local wallpaper named {}", name);
            }
            Ok(())
        }

        /// Changes wallpaper every `slideshow_interval` minutes. Stops after
        /// `rounds` changes when given.
        pub fn slideshow(&mut self, rounds: Option<u32>) -> Result<()> {
            let minutes = self.session.settings().slideshow_interval;
            if minutes == 0 {
                bail!("Slideshow is off. Set an interval with `wallfeed settings --interval <minutes>`.");
            }
            let interval = Duration::from_secs(u64::from(minutes) * 60);

            let mut shown = 0;
            loop {
                if let Err(e) = self.next_wallpaper() {
                    warn!("Slideshow change failed: {:#}", e);
                }
                shown += 1;
                if rounds.is_some_and(|limit| shown >= limit) {
                    break;
                }
                println!("Next change in {} min", minutes);
                thread::sleep(interval);
            }
            Ok(())
        }

        fn current_title(&self) -> String {
            match self.session.current() {
                Some(wallpaper) if wallpaper.title.chars().count() > 30 => {
                    format!("{}...", wallpaper.title.chars().take(30).collect::<String>())
                }
                Some(wallpaper) => wallpaper.title.clone(),
                None => "(no wallpaper)".to_string(),
            }
        }

        pub fn show_menu(&self) -> Result<()> {
            let title = self.current_title();
            let settings = self.session.settings();
            let favorited = match self.session.current() {
                Some(wallpaper) => self.session.is_favorited(&wallpaper.url).unwrap_or(false),
                None => false,
            };

            println!("\n=== Wallfeed - Wallpaper Feed ===");
            println!("Current wallpaper: {}", title);
            println!(
                "Sources: {} | Sort: {} | Pool: {:?} | State: {:?}",
                settings.subreddit,
                settings.sort,
                self.session.pool(),
                self.session.state()
            );
            println!();
            println!("0. Open post in browser");
            println!("1. Next wallpaper");
            println!("2. Previous wallpaper");
            if favorited {
                println!("3. Unfavorite \"{}\"", title);
            } else {
                println!("3. Favorite \"{}\"", title);
            }
            println!("4. Blacklist \"{}\"", title);
            println!("5. Open image for download");
            println!("6. Cached wallpapers");
            println!("7. Clear cache");
            println!("8. Exit");
            print!("\nSelect an option (0-8): ");
            io::stdout().flush()?;
            Ok(())
        }

        pub fn run(&mut self) -> Result<()> {
            if let Err(e) = self.show() {
                eprintln!("Failed to load wallpaper: {}", e);
            }

            loop {
                self.show_menu()?;

                let mut input = String::new();
                if io::stdin().read_line(&mut input)? == 0 {
                    break;
                }

                let result = match input.trim() {
                    "0" => self.open_post(),
                    "1" => self.next_wallpaper(),
                    "2" => self.previous_wallpaper(),
                    "3" => self.toggle_favorite(),
                    "4" => self.blacklist_current(),
                    "5" => self.download(),
                    "6" => self.list_cached(),
                    "7" => self.clear_cache(),
                    "8" => {
                        println!("Exiting Wallfeed...");
                        break;
                    }
                    _ => {
                        println!("Invalid option. Please select 0-8.");
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    eprintln!("Error: {:#}", e);
                }
            }

            Ok(())
        }
    }

}
