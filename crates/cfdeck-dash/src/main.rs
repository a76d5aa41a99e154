mod app;
mod command_client;
mod config;
mod headless;
mod logging;
mod ui;
mod workers;

use crate::app::{App, AppSettings, View};
use crate::command_client::CommandClient;
use crate::config::{load_config, Args};
use crate::workers::Fetcher;
use cfdeck_cache::{Registry, StalenessPolicy};
use cfdeck_core::clock::SystemClock;
use cfdeck_core::ServiceKind;
use cfdeck_tail::TailSessionManager;
use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const TICK_MS: u64 = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(Args::parse())?;
    let log_path = logging::init_logging();
    info!(
        event = "cfdeck_start",
        config_path = %config.config_path.display(),
        log_path = ?log_path,
        account_id = %config.account_id,
        headless = config.headless
    );

    let client = Arc::new(CommandClient::new(
        config.commands.clone(),
        &config.accounts,
    ));
    if config.headless {
        return headless::run_headless(&config, client).await;
    }

    let registry = Registry::new(
        config.account_id.clone(),
        StalenessPolicy::from_secs(config.cache_ttl_secs),
        SystemClock::shared(),
    );
    let (tails, mut tail_rx) = TailSessionManager::new(client.clone());
    let tails = tails.with_max_grid(config.max_grid);
    let (fetcher, mut fetch_rx) = Fetcher::new(client.clone(), client, config.fetch_timeout);
    let mut app = App::new(AppSettings::from_config(&config), registry, tails, fetcher);
    app.start();

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut events = EventStream::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(TICK_MS));

    let result = loop {
        if let Err(err) = terminal.draw(|frame| ui::render_ui(frame, &app)) {
            break Err(err);
        }
        tokio::select! {
            _ = ticker.tick() => {
                app.tick();
            }
            Some(event) = fetch_rx.recv() => {
                app.apply_fetch_event(event);
            }
            Some(event) = tail_rx.recv() => {
                app.apply_tail_event(event);
            }
            maybe_event = events.next() => {
                if let Some(Ok(event)) = maybe_event {
                    if handle_input(event, &mut app) {
                        break Ok(());
                    }
                }
            }
        }
    };

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    app.shutdown().await;
    info!(event = "cfdeck_exit");
    result.map_err(Into::into)
}

fn handle_input(event: Event, app: &mut App) -> bool {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => handle_key(key, app),
        _ => false,
    }
}

fn handle_key(key: KeyEvent, app: &mut App) -> bool {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }
    if matches!(key.code, KeyCode::Char('?') | KeyCode::F(1)) {
        app.help_open = !app.help_open;
        return false;
    }
    if key.code == KeyCode::Esc && app.help_open {
        app.help_open = false;
        return false;
    }
    if app.help_open {
        return false;
    }

    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Char(digit @ '1'..='8') => {
            let index = digit as usize - '1' as usize;
            if let Some(service) = ServiceKind::ALL.get(index) {
                app.show_service(*service);
            }
        }
        KeyCode::Tab => app.next_service(),
        KeyCode::Down | KeyCode::Char('j') => app.move_selection(1),
        KeyCode::Up | KeyCode::Char('k') => app.move_selection(-1),
        KeyCode::PageDown => app.move_selection(10),
        KeyCode::PageUp => app.move_selection(-10),
        KeyCode::Enter => app.open_detail(),
        KeyCode::Esc | KeyCode::Char('h') => match app.view {
            View::Services if app.service == ServiceKind::Workers => {}
            _ => app.go_home(),
        },
        KeyCode::Char('t') => app.tail_selected(),
        KeyCode::Char('g') => app.tail_grid(),
        KeyCode::Char('s') => app.stop_tails(),
        KeyCode::Char('x') => app.stop_focused_grid_cell(),
        KeyCode::Char('a') => app.cycle_account(),
        KeyCode::Char('r') => app.refresh_current(),
        _ => {}
    }
    false
}
