use std::{fs, io, path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};

use typein::{Interpreter, Repl, ReplConfig, ReplError, ScriptedInput, Terminal};

#[derive(Parser)]
#[command(author, version, about = "Interactive shell for the typein script engine")]
struct Args {
    /// Log loop activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Load and save line history in this file
    #[arg(long, env = "TYPEIN_HISTORY", global = true)]
    history: Option<PathBuf>,
    /// Neither read nor write line history
    #[arg(long, global = true)]
    no_history: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive session (the default)
    Repl,
    /// Feed a snippet through the loop line by line
    Eval { source: String },
    /// Evaluate a script file as a single unit
    Run { script: PathBuf },
}

fn main() -> ExitCode {
    let args = Args::parse();
    if args.verbose {
        tracing_subscriber::fmt()
            .with_writer(io::stderr)
            .with_max_level(tracing::Level::TRACE)
            .init();
    }

    let history = if args.no_history { None } else { args.history };
    let config = ReplConfig::default().with_history_file(history);
    let result = match args.command.unwrap_or(Command::Repl) {
        Command::Repl => interactive(config),
        Command::Eval { source } => eval_snippet(config, &source),
        Command::Run { script } => run_script(config, script),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("fatal error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn interactive(config: ReplConfig) -> Result<bool, ReplError> {
    let mut terminal = Terminal::new(config.history_file.clone())?;
    let mut repl = Repl::new(Interpreter::new(), config)?;
    let state = repl.run(&mut terminal, &mut io::stdout(), &mut io::stderr());
    println!();
    if let Err(err) = terminal.save_history() {
        tracing::warn!(%err, "could not save history");
    }
    state.map(|_| true)
}

fn eval_snippet(config: ReplConfig, source: &str) -> Result<bool, ReplError> {
    let mut input = ScriptedInput::from_source(source);
    let mut repl = Repl::new(Interpreter::new(), config)?;
    repl.run(&mut input, &mut io::stdout(), &mut io::stderr())?;
    Ok(repl.errors_reported() == 0)
}

fn run_script(config: ReplConfig, path: PathBuf) -> Result<bool, ReplError> {
    let source = fs::read_to_string(&path)?;
    let filename = path.display().to_string();
    let mut repl = Repl::new(Interpreter::new(), config.with_filename(filename.clone()))?;
    repl.run_source(&source, &filename, &mut io::stdout(), &mut io::stderr())
}
