use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wallfeed_cli::{SettingsUpdate, WallfeedCliApp};

#[derive(Parser)]
#[command(author, version, about = "Rotating wallpapers from Reddit feeds", long_about = None)]
struct Cli {
    /// Store file to use instead of the per-user default
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive menu (default)
    Menu,
    /// Show the current wallpaper, restoring it or picking one
    Show,
    /// Pick a new random wallpaper
    Next,
    /// Go back to the previous wallpaper
    Back,
    /// Toggle the current wallpaper as a favorite
    Favorite,
    /// List favorites
    Favorites,
    /// Remove a favorite by URL
    Unfavorite { url: String },
    /// Blacklist the current wallpaper and pick another
    Blacklist,
    /// Remove a URL from the blacklist
    Unblacklist { url: String },
    /// List blacklisted URLs
    Blacklisted,
    /// Empty the blacklist
    ClearBlacklist,
    /// List every cached wallpaper
    Cached,
    /// Drop all cached feed results
    ClearCache,
    /// Recently used sources
    Recent,
    /// Show settings, or change them when options are given
    Settings(SettingsUpdate),
    /// Open the current wallpaper's post in a browser
    Open,
    /// Open the current wallpaper's image in a browser for saving
    Download,
    /// Add an image or video file as a local wallpaper
    Upload { path: PathBuf },
    /// List local wallpapers
    Uploads,
    /// Remove a local wallpaper by name
    RemoveUpload { name: String },
    /// Change wallpaper every slideshow interval
    Slideshow {
        /// Stop after this many changes
        #[arg(long)]
        rounds: Option<u32>,
    },
}

fn init_logging() {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug".to_owned()
        } else {
            "info".to_owned()
        }
    });
    env_logger::Builder::new().parse_filters(&rust_log).init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let mut app = WallfeedCliApp::new(cli.store)?;
    log::debug!("Store file {:?}", app.config().store_file);

    match cli.command.unwrap_or(Commands::Menu) {
        Commands::Menu => app.run()?,
        Commands::Show => app.show()?,
        Commands::Next => app.next_wallpaper()?,
        Commands::Back => app.previous_wallpaper()?,
        Commands::Favorite => app.toggle_favorite()?,
        Commands::Favorites => app.list_favorites()?,
        Commands::Unfavorite { url } => app.remove_favorite(&url)?,
        Commands::Blacklist => app.blacklist_current()?,
        Commands::Unblacklist { url } => app.unblacklist(&url)?,
        Commands::Blacklisted => app.list_blacklisted()?,
        Commands::ClearBlacklist => app.clear_blacklist()?,
        Commands::Cached => app.list_cached()?,
        Commands::ClearCache => app.clear_cache()?,
        Commands::Recent => app.list_recent()?,
        Commands::Settings(update) => app.update_settings(&update)?,
        Commands::Open => app.open_post()?,
        Commands::Download => app.download()?,
        Commands::Upload { path } => app.upload(&path)?,
        Commands::Uploads => app.list_uploads()?,
        Commands::RemoveUpload { name } => app.remove_upload(&name)?,
        Commands::Slideshow { rounds } => app.slideshow(rounds)?,
    }

    Ok(())
}
