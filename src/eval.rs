use std::io::Write;

use crate::{
    diagnostics::Result,
    engine::{Engine, Failure},
    environment::ExecutionEnvironment,
    format::format_result,
    input::InputBuffer,
    report::{print_diagnostic, report_exception, Report},
};

/// Result of one evaluation step as seen by the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Quit,
    Error(Report),
}

/// Evaluates a complete buffer and prints its result to `out`.
///
/// Warnings go to `err` ahead of the result or failure they belong to.
/// Void results print nothing. Failures are classified but not printed;
/// the only `Err` is the fatal uncatchable-without-quit case.
pub fn eval_and_print<E, O, W>(
    engine: &mut E,
    env: &mut ExecutionEnvironment<E::Global>,
    filename: &str,
    buffer: &InputBuffer,
    out: &mut O,
    err: &mut W,
) -> Result<Outcome>
where
    E: Engine,
    O: Write + ?Sized,
    W: Write + ?Sized,
{
    tracing::debug!(start_line = buffer.start_line, bytes = buffer.text.len(), "evaluating");
    let result = engine.evaluate(env, &buffer.text, filename, buffer.start_line);
    flush_warnings(env, err)?;
    let value = match result {
        Ok(value) => value,
        Err(failure) => {
            let outcome = classify(engine, env, failure);
            flush_warnings(env, err)?;
            return outcome;
        }
    };

    engine.maybe_gc();

    if engine.is_void(&value) {
        return Ok(Outcome::Continue);
    }
    let display = format_result(engine, env, &value);
    flush_warnings(env, err)?;
    if !display.is_empty() {
        writeln!(out, "{display}")?;
        out.flush()?;
    }
    Ok(Outcome::Continue)
}

/// Decides between the intentional quit and a reportable failure. The
/// quit flag is checked before anything tries to extract an exception.
pub fn classify<E: Engine>(
    engine: &mut E,
    env: &mut ExecutionEnvironment<E::Global>,
    failure: Failure<E::Value>,
) -> Result<Outcome> {
    if env.should_quit() {
        return Ok(Outcome::Quit);
    }
    report_exception(engine, env, failure).map(Outcome::Error)
}

/// Runs queued continuations until the queue is empty or one of them
/// quits. Errors from individual jobs are printed as they happen.
pub fn drain_jobs<E, W>(
    engine: &mut E,
    env: &mut ExecutionEnvironment<E::Global>,
    err: &mut W,
) -> Result<DrainSummary>
where
    E: Engine,
    W: Write + ?Sized,
{
    let mut summary = DrainSummary::default();
    while !env.should_quit() {
        let Some(result) = engine.run_next_job(env) else {
            break;
        };
        summary.ran += 1;
        if let Err(failure) = result {
            match classify(engine, env, failure)? {
                Outcome::Error(report) => {
                    report.write_to(err)?;
                    summary.errors += 1;
                }
                Outcome::Quit | Outcome::Continue => {}
            }
        }
        flush_warnings(env, err)?;
    }
    if summary.ran > 0 {
        tracing::debug!(ran = summary.ran, errors = summary.errors, "drained job queue");
    }
    Ok(summary)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub ran: usize,
    pub errors: usize,
}

/// Prints and discards the warnings the engine queued on `env`.
pub fn flush_warnings<G, W>(env: &mut ExecutionEnvironment<G>, err: &mut W) -> Result<()>
where
    W: Write + ?Sized,
{
    for warning in env.take_warnings() {
        print_diagnostic(err, &warning)?;
    }
    Ok(())
}
