mod actor;
mod app;
mod backend;
mod config;
mod data_source;
mod error;
mod loader;
mod media;
mod navigation;
mod preloader;
mod signal;
mod ui;

use actor::ActorRegistry;
use app::App;
use backend::cache::PageCache;
use backend::data_sources::create_data_source;
use backend::mangadex::{Catalog, MangaDexClient};
use backend::media_cache::{GuessImageUrl, MediaCache};
use backend::muting::{self, MuteList};
use config::Config;
use data_source::DataSourceRegistry;
use error::AppError;
use loader::Transport;
use media::MediaInfoProvider;
use navigation::{Args, NavigationCause, Navigator};
use preloader::{ImagePreloader, PreloadDeps};
use ui::illust::{IllustDeps, IllustScreen};
use ui::search::SearchScreen;
use ui::status::StatusBar;
use ui::ui::Ui;

use crossterm::{
    event::{
        DisableMouseCapture, EnableMouseCapture, Event, EventStream, KeyCode, KeyEvent,
        KeyEventKind, KeyModifiers, MouseButton, MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use log::{debug, info, warn};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{error::Error, fs, io, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::mpsc;

/// Everything the event loop draws and dispatches to.
struct Session {
    app: Arc<App>,
    search: Arc<SearchScreen>,
    illust: Arc<IllustScreen>,
    status: Arc<StatusBar>,
}

/// Log to a file under the cache directory, since the terminal belongs to the
/// UI. `RUST_LOG` overrides the configured level.
fn init_logging(config: &Config) {
    let dir = dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vview-tui");
    let file = match fs::create_dir_all(&dir).and_then(|_| fs::File::create(dir.join("vview-tui.log"))) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Logging disabled: {e}");
            return;
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .target(env_logger::Target::Pipe(Box::new(file)))
    .init();
}

fn load_config() -> Config {
    let config = Config::load();
    let path = config::config_path();
    if !path.exists() {
        // Write the defaults out so there's something to edit.
        if let Err(e) = config.save_to(&path) {
            warn!("{e}");
        }
    }
    config
}

fn build_session(config: &Config, registry: &ActorRegistry) -> Result<(Session, mpsc::UnboundedReceiver<NavigationCause>), Box<dyn Error>> {
    let client = Arc::new(MangaDexClient::new(config.api_base_url.as_str())?);
    let catalog: Arc<dyn Catalog> = client.clone();
    let transport: Arc<dyn Transport> = client;

    let media: Arc<dyn MediaInfoProvider> = Arc::new(MediaCache::new(catalog.clone()));
    let mutes = Arc::new(MuteList::load(&muting::default_path()).unwrap_or_else(|e| {
        warn!("Starting with no mutes: {e}");
        MuteList::default()
    }));
    let cache = PageCache::new(PageCache::default_dir(), &config.cache);

    let preloader = ImagePreloader::new(
        config,
        PreloadDeps {
            media: media.clone(),
            guesser: Arc::new(GuessImageUrl::new(media.clone())),
            muting: mutes.clone(),
            transport: transport.clone(),
            cache: Some(cache.clone()),
        },
    );

    let Ok(initial) = config.initial_url.parse::<Args>();
    let (navigator, navigation_events) = Navigator::new(initial);
    let data_sources = DataSourceRegistry::new(move |args: &Args| create_data_source(&catalog, args));
    let app = Arc::new(App::new(registry, Arc::new(navigator), Arc::new(data_sources)));

    let search = SearchScreen::new(registry, &app);
    let illust = IllustScreen::new(
        registry,
        &app,
        IllustDeps {
            preloader,
            media,
            transport,
            cache: Some(cache),
            mutes,
        },
        Duration::from_secs(config.slideshow_seconds.max(1)),
    );
    app.register_screen(search.clone());
    app.register_screen(illust.clone());

    let status = Arc::new(StatusBar::default());
    app.add_observer(status.clone());

    let session = Session {
        app,
        search,
        illust,
        status,
    };
    Ok((session, navigation_events))
}

/// Run a transition in the background. Failures are reported on `errors`.
fn spawn_transition(app: &Arc<App>, cause: NavigationCause, errors: &mpsc::UnboundedSender<AppError>) {
    let app = app.clone();
    let errors = errors.clone();
    tokio::spawn(async move {
        if let Err(e) = app.set_current_data_source(cause).await {
            let _ = errors.send(e);
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = load_config();
    init_logging(&config);
    info!("Starting at {}", config.initial_url);

    let registry = ActorRegistry::new();
    let (session, mut navigation_events) = build_session(&config, &registry)?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut ui = Ui::new();

    let res = run_app(&mut terminal, &session, &mut ui, &mut navigation_events).await;

    session.app.shutdown();
    registry.dump_actors();

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("{err}");
    }
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    session: &Session,
    ui: &mut Ui,
    navigation_events: &mut mpsc::UnboundedReceiver<NavigationCause>,
) -> io::Result<()> {
    let app = &session.app;
    let mut event_stream = EventStream::new();
    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel::<AppError>();
    let mut screen_changes = app.subscribe_screen_changed();

    spawn_transition(app, NavigationCause::Initialization, &errors_tx);

    loop {
        terminal.draw(|f| {
            ui.draw(
                f,
                app.current_screen_name(),
                &session.search,
                &session.illust,
                &session.status,
            )
        })?;

        tokio::select! {
            // Redraw for spinners and images loaded in the background
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}

            Some(Ok(event)) = event_stream.next() => match event {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
                        return Ok(());
                    }
                    session.status.clear_message();
                    if !app.handle_key(key) && key.code == KeyCode::Char('q') {
                        return Ok(());
                    }
                }
                Event::Mouse(mouse) if mouse.kind == MouseEventKind::Down(MouseButton::Left) => {
                    if app.should_ignore_click() {
                        debug!("Ignoring click right after showing the listing");
                    } else {
                        app.handle_key(KeyEvent::from(KeyCode::Enter));
                    }
                }
                _ => {}
            },

            Some(cause) = navigation_events.recv() => spawn_transition(app, cause, &errors_tx),

            Some(error) = errors_rx.recv() => session.status.set_message(error.to_string()),

            Ok(screen) = screen_changes.recv() => ui.screen_changed(screen),
        }
    }
}
