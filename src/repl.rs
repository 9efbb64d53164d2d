use std::io::Write;

use crate::{
    config::ReplConfig,
    diagnostics::Result,
    engine::Engine,
    environment::ExecutionEnvironment,
    eval::{self, Outcome},
    input::{InputAccumulator, InputBuffer, LineSource},
};

/// Where the loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    EndOfInput,
    Quitting,
}

pub struct Repl<E: Engine> {
    engine: E,
    env: ExecutionEnvironment<E::Global>,
    config: ReplConfig,
    accumulator: InputAccumulator,
    state: LoopState,
    errors_reported: usize,
}

impl<E: Engine> Repl<E> {
    pub fn new(mut engine: E, config: ReplConfig) -> Result<Self> {
        let global = engine.new_global()?;
        let accumulator = InputAccumulator::new(&config);
        Ok(Self {
            engine,
            env: ExecutionEnvironment::new(global),
            config,
            accumulator,
            state: LoopState::Running,
            errors_reported: 0,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn environment(&self) -> &ExecutionEnvironment<E::Global> {
        &self.env
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Errors and uncaught exceptions printed so far.
    pub fn errors_reported(&self) -> usize {
        self.errors_reported
    }

    /// Reads, evaluates and prints until end of input or `quit()`.
    ///
    /// Results go to `out`, diagnostics to `err`. The only error returned
    /// is fatal: I/O trouble or an uncatchable failure that was not a quit.
    pub fn run<S, O, W>(&mut self, input: &mut S, out: &mut O, err: &mut W) -> Result<LoopState>
    where
        S: LineSource + ?Sized,
        O: Write + ?Sized,
        W: Write + ?Sized,
    {
        while self.state == LoopState::Running {
            let engine = &self.engine;
            let global = self.env.global();
            let buffer = self
                .accumulator
                .next_buffer(input, |text| engine.is_compilable_unit(global, text))?;
            if buffer.end_of_input {
                tracing::info!(line = self.accumulator.current_line(), "end of input");
                self.state = LoopState::EndOfInput;
            }
            if !buffer.is_empty() {
                self.step(&buffer, out, err)?;
            }

            if self.env.should_quit() {
                tracing::info!("quit requested");
                self.state = LoopState::Quitting;
            } else {
                let summary = eval::drain_jobs(&mut self.engine, &mut self.env, err)?;
                self.errors_reported += summary.errors;
                if self.env.should_quit() {
                    tracing::info!("quit requested from a queued job");
                    self.state = LoopState::Quitting;
                }
            }
        }
        Ok(self.state)
    }

    /// Evaluates a whole source text as one unit, then drains the job
    /// queue. Returns whether the run was free of reported errors.
    pub fn run_source<O, W>(&mut self, source: &str, filename: &str, out: &mut O, err: &mut W) -> Result<bool>
    where
        O: Write + ?Sized,
        W: Write + ?Sized,
    {
        let before = self.errors_reported;
        let buffer = InputBuffer {
            text: source.to_string(),
            start_line: self.config.first_line,
            end_of_input: true,
        };
        let outcome = eval::eval_and_print(&mut self.engine, &mut self.env, filename, &buffer, out, err)?;
        self.handle_outcome(outcome, err)?;
        if self.env.should_quit() {
            self.state = LoopState::Quitting;
        } else {
            let summary = eval::drain_jobs(&mut self.engine, &mut self.env, err)?;
            self.errors_reported += summary.errors;
        }
        Ok(self.errors_reported == before)
    }

    fn step<O, W>(&mut self, buffer: &InputBuffer, out: &mut O, err: &mut W) -> Result<()>
    where
        O: Write + ?Sized,
        W: Write + ?Sized,
    {
        let outcome = eval::eval_and_print(
            &mut self.engine,
            &mut self.env,
            &self.config.filename,
            buffer,
            out,
            err,
        )?;
        self.handle_outcome(outcome, err)
    }

    fn handle_outcome<W: Write + ?Sized>(&mut self, outcome: Outcome, err: &mut W) -> Result<()> {
        match outcome {
            Outcome::Continue => {}
            Outcome::Quit => self.state = LoopState::Quitting,
            Outcome::Error(report) => {
                report.write_to(err)?;
                self.errors_reported += 1;
            }
        }
        Ok(())
    }
}
