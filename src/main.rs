// Copyright 2018 The dirwatch Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The dirwatch daemon.
//!
//! Startup is linear: logger, configuration, audit socket, watch tree.
//! After registering as the kernel's audit listener the daemon loops on
//! `next_record()` until a termination signal flips the shutdown flag;
//! dropping the handler then tears the watch tree down, which removes
//! every installed rule before the socket closes.

use std::cell::RefCell;
use std::env;
use std::io;
use std::process;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info};

use dirwatch_audit::NetlinkAudit;
use dirwatch_core_lib::{Config, Error, EventHandler, SourceRef};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        // no SA_RESTART: the blocking read must return with EINTR so
        // the run loop sees the flag
        action.sa_sigaction = handle_shutdown as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGTERM, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut());
    }
}

fn setup_logging() {
    let level = match env::var("DIRWATCH_LOG") {
        Ok(ref level) => match level.as_str() {
            "error" => log::LevelFilter::Error,
            "warn" => log::LevelFilter::Warn,
            "debug" => log::LevelFilter::Debug,
            "trace" => log::LevelFilter::Trace,
            _ => log::LevelFilter::Info,
        },
        Err(_) => log::LevelFilter::Info,
    };

    let result = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[dirwatch] {} [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(io::stderr())
        .apply();
    if let Err(e) = result {
        eprintln!("[dirwatch] failed to set up logging: {:?}", e);
    }
}

fn run() -> Result<(), Error> {
    let config_path = Config::config_path();
    let config = Config::load(&config_path)?;
    info!("loaded {} with {} watched roots", config_path.display(), config.dirs.len());

    let audit = Rc::new(RefCell::new(NetlinkAudit::open()?));
    let source: SourceRef = audit.clone();
    let mut handler = EventHandler::create(source, &config)?;

    install_signal_handlers();

    {
        let mut audit = audit.borrow_mut();
        audit.set_listener_pid(process::id())?;
        audit.set_enabled(true)?;
    }
    info!("audit stream enabled");

    while !SHUTDOWN.load(Ordering::SeqCst) {
        match handler.next_record() {
            Ok(()) => (),
            Err(ref e) if e.is_interrupted() => (),
            Err(e) => error!("{}", e),
        }
    }
    info!("shutting down");
    Ok(())
}

fn main() {
    setup_logging();
    if let Err(e) = run() {
        error!("fatal: {}", e);
        process::exit(1);
    }
}
