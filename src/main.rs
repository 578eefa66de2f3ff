use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use syslog::Facility;

use door_trigger::cli::{Cli, Commands};
use door_trigger::clock::SystemClock;
use door_trigger::forward::{self, ForwardError, Forwarded};
use door_trigger::remote::UreqTransport;
use door_trigger::shortcut::{self, Shortcut};
use door_trigger::{http, Controller, ExternalTrigger, Request, Settings};

const ONE_SECOND: Duration = Duration::from_secs(1);
const ONCE_TIMEOUT: Duration = Duration::from_secs(60);

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if let Err(err) = syslog::init(
        Facility::LOG_DAEMON,
        cli.log_level.to_level_filter(),
        Some("door-trigger"),
    ) {
        eprintln!("Unable to connect to syslog, logging disabled: {}", err);
    }

    let settings = match &cli.settings {
        Some(path) => Settings::new(path),
        None => Settings::default_location()?,
    };

    match &cli.command {
        Some(Commands::SetUrl { url }) => {
            settings.save(url)?;
            println!("Saved {}", settings.path().display());
            return Ok(());
        }
        Some(Commands::GetUrl) => {
            println!("{}", settings.load()?);
            return Ok(());
        }
        Some(Commands::InstallShortcut { dir }) => {
            let dir = match dir.clone().or_else(shortcut::default_dir) {
                Some(dir) => dir,
                None => return Err("no applications directory on this platform".into()),
            };
            let path = Shortcut::new(std::env::current_exe()?).install(&dir)?;
            println!("Installed {}", path.display());
            return Ok(());
        }
        Some(Commands::UninstallShortcut { dir }) => {
            let dir = match dir.clone().or_else(shortcut::default_dir) {
                Some(dir) => dir,
                None => return Err("no applications directory on this platform".into()),
            };
            if shortcut::uninstall(&dir)? {
                println!("Removed {}", dir.join(shortcut::DESKTOP_FILE).display());
            } else {
                println!("No shortcut installed in {}", dir.display());
            }
            return Ok(());
        }
        None => {}
    }

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;

    let controller = Arc::new(Controller::new(
        settings,
        Arc::new(UreqTransport::new()),
        Arc::new(SystemClock),
    ));
    let external = ExternalTrigger::from_launch(&cli.launch_context());

    if cli.once {
        run_once(&controller, &external, &cli.listen, &term);
        return Ok(());
    }

    // Start HTTP server
    let server = match http::Server::new(cli.listen.as_str()) {
        Ok(server) => Arc::new(server),
        Err(err) => {
            eprintln!("Unable to start http server on {}: {}", cli.listen, err);
            let err: Box<dyn Error> = err;
            return Err(err);
        }
    };
    match server.local_addr() {
        Some(addr) => eprintln!("http server running on {}", addr),
        None => eprintln!("http server running on {}", cli.listen),
    }

    // Handle HTTP requests
    let server_thread = spawn_server(&server, &controller);

    external.dispatch(&controller);

    // Publish request results until asked to exit
    while !term.load(Ordering::Relaxed) {
        controller.apply_outcomes(ONE_SECOND);
    }
    server.shutdown();
    let _ = server_thread.join();

    Ok(())
}

fn spawn_server(server: &Arc<http::Server>, controller: &Arc<Controller>) -> thread::JoinHandle<()> {
    let server = Arc::clone(server);
    let controller = Arc::clone(controller);
    thread::spawn(move || {
        server.handle_requests(controller);
        log::info!("server thread exiting");
    })
}

// A launch signal goes to the running instance when there is one, so its cooldown
// covers shortcut and URI launches too.
fn run_once(controller: &Arc<Controller>, external: &ExternalTrigger, listen: &str, term: &AtomicBool) {
    if !external.is_pending() {
        eprintln!("No open-door signal given, nothing to do");
        return;
    }
    if !forward_to_running(listen) {
        return;
    }

    // Nobody is listening: hold the address until the cooldown ends so that launches
    // arriving meanwhile are forwarded here and dropped.
    let server = match http::Server::new(listen) {
        Ok(server) => Some(Arc::new(server)),
        Err(err) => {
            log::warn!("unable to listen on {}: {}", listen, err);
            if !forward_to_running(listen) {
                return;
            }
            None
        }
    };
    let server_thread = server
        .as_ref()
        .map(|server| spawn_server(server, controller));

    if let Some(Request::Fired(_)) = external.dispatch(controller) {
        let deadline = Instant::now() + ONCE_TIMEOUT;
        while !term.load(Ordering::Relaxed) && Instant::now() < deadline {
            if controller.apply_outcomes(ONE_SECOND) > 0 {
                break;
            }
        }
        println!("{}", controller.current_result());
    }

    while !term.load(Ordering::Relaxed) && !controller.is_enabled() {
        controller.apply_outcomes(ONE_SECOND / 10);
    }
    if let (Some(server), Some(thread)) = (server, server_thread) {
        server.shutdown();
        let _ = thread.join();
    }
}

/// Returns true when no instance is listening and the trigger must be fired here.
fn forward_to_running(listen: &str) -> bool {
    match forward::trigger(listen, ONCE_TIMEOUT) {
        Ok(Forwarded::Opened(result)) => println!("{}", result),
        Ok(Forwarded::Ignored) => println!("Cooling down, request ignored"),
        Ok(Forwarded::Pending) => println!("Request sent, no result yet"),
        Err(ForwardError::Unreachable(_)) => return true,
        Err(err) => eprintln!("{}", err),
    }
    false
}
