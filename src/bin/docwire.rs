use std::{
    error::Error,
    fs::File,
    io,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bson::{Document, doc};
use clap::Parser;
use docwire::{
    Manager,
    config::DebugLog,
    shell::{CommandError, Flow, ShellError, prompt, run},
};
use log::LevelFilter;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Connection string, e.g. mongodb://localhost:27017
    uri: String,
    /// Trace connection I/O to `stderr`, `stdout` or a file
    #[arg(long)]
    debug: Option<String>,
    /// PEM bundle of trusted root certificates
    #[arg(long)]
    ca_file: Option<PathBuf>,
}

impl Cli {
    fn driver_options(&self) -> Document {
        let mut options = Document::new();
        if let Some(debug) = &self.debug {
            options.insert("debug", debug.as_str());
        }
        if let Some(ca_file) = &self.ca_file {
            options.insert(
                "context",
                doc! { "ssl": { "cafile": ca_file.to_string_lossy().into_owned() } },
            );
        }
        options
    }
}

fn init_logger(debug: &DebugLog) -> io::Result<()> {
    let mut builder = env_logger::Builder::from_default_env();

    match debug {
        DebugLog::Off => {}
        DebugLog::Stderr => {
            builder.filter_module("docwire", LevelFilter::Trace);
        }
        DebugLog::Stdout => {
            builder
                .filter_module("docwire", LevelFilter::Trace)
                .target(env_logger::Target::Stdout);
        }
        DebugLog::File(path) => {
            builder
                .filter_module("docwire", LevelFilter::Trace)
                .target(env_logger::Target::Pipe(Box::new(File::create(path)?)));
        }
    }

    builder.init();
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let debug = DebugLog::from_setting(cli.debug.as_deref().unwrap_or_default());
    init_logger(&debug)?;

    let manager = Manager::new(&cli.uri, Some(&cli.driver_options()))?;

    // Ctrl-C only stops the result being printed
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

    let stdio = io::stdin();
    let stdout = io::stdout();

    loop {
        let reader = stdio.lock();
        let writer = Flushing {
            inner: stdout.lock(),
        };

        let cmd = match prompt(reader, writer) {
            Ok(Some(c)) => c,
            Ok(None) => break,
            Err(ShellError::Command(CommandError::Empty)) => continue,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        let mut writer = Flushing {
            inner: stdout.lock(),
        };
        match run(&manager, cmd, &mut writer, &interrupted) {
            Ok(Flow::Exit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => eprintln!("error: {e}"),
        }
    }

    Ok(())
}

/// Terminal writer that flushes after every write, so each printed document shows up
/// while a long result is still streaming.
struct Flushing<W: io::Write> {
    inner: W,
}

impl<W: io::Write> io::Write for Flushing<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.inner.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
