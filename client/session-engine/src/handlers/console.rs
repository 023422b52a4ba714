//! Line-oriented front-end for driving a session from a terminal.

use std::io::BufRead;

use tokio::sync::{mpsc, watch};

use crate::engine::{EngineCommand, EngineEvent, SubmitTrigger};
use crate::models::answer::AnswerSlot;
use crate::models::results::Results;
use crate::models::timer::{TimerEvent, Urgency};
use crate::models::{Question, SessionSummary};
use crate::utils::time::format_countdown;

pub const HELP: &str = "\
commands:
  n | next            next question
  p | prev            previous question
  j <number>          jump to question (1-based)
  a <label|id>        answer the current question
  c | clear           clear the current answer
  f | flag            toggle flag on the current question
  summary             show progress
  s | submit          submit the session
  q | quit            abandon the session
  h | help            this text";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    Engine(EngineCommand),
    Help,
}

/// Parses one input line. Option labels are matched case-insensitively
/// against the current question and resolved to option ids.
pub fn parse_line(line: &str, current: Option<&Question>) -> Result<ConsoleInput, String> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Err("empty input".to_string());
    };
    let arg = parts.next();

    let command = match word.to_ascii_lowercase().as_str() {
        "n" | "next" => EngineCommand::Next,
        "p" | "prev" | "previous" => EngineCommand::Previous,
        "j" | "jump" => {
            let number: usize = arg
                .ok_or("jump needs a question number")?
                .parse()
                .map_err(|_| "question number must be a positive integer".to_string())?;
            if number == 0 {
                return Err("question numbers start at 1".to_string());
            }
            EngineCommand::JumpTo(number - 1)
        }
        "a" | "answer" => {
            let choice = arg.ok_or("answer needs an option label")?;
            EngineCommand::Select(resolve_option(choice, current))
        }
        "c" | "clear" => EngineCommand::ClearSelection,
        "f" | "flag" => EngineCommand::ToggleFlag,
        "summary" => EngineCommand::Refresh,
        "s" | "submit" => EngineCommand::Submit,
        "q" | "quit" | "exit" => EngineCommand::Abandon,
        "h" | "help" | "?" => return Ok(ConsoleInput::Help),
        other => return Err(format!("unknown command '{}', try 'help'", other)),
    };

    Ok(ConsoleInput::Engine(command))
}

/// Feeds parsed commands to the engine until EOF or until the engine stops
/// listening. Blocks the calling thread.
pub fn read_commands<R: BufRead>(
    input: R,
    questions: &[Question],
    current_index: &watch::Receiver<usize>,
    commands: &mpsc::Sender<EngineCommand>,
) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        // Labels resolve against whichever question is on screen
        let current = questions.get(*current_index.borrow());
        match parse_line(&line, current) {
            Ok(ConsoleInput::Engine(command)) => {
                if commands.blocking_send(command).is_err() {
                    break;
                }
            }
            Ok(ConsoleInput::Help) => println!("{}", HELP),
            Err(message) => println!("! {}", message),
        }
    }
}

fn resolve_option(choice: &str, current: Option<&Question>) -> String {
    current
        .and_then(|q| {
            q.options
                .iter()
                .find(|o| o.label.eq_ignore_ascii_case(choice))
                .map(|o| o.id.clone())
        })
        .unwrap_or_else(|| choice.to_string())
}

pub fn render_question(
    question: &Question,
    index: usize,
    total: usize,
    answer: Option<&AnswerSlot>,
) -> String {
    let flagged = answer.map(|a| a.flagged).unwrap_or(false);
    let selected = answer.and_then(|a| a.selected_option.as_deref());

    let mut out = format!(
        "\nQuestion {}/{}{}\n{}\n",
        index + 1,
        total,
        if flagged { " [flagged]" } else { "" },
        question.body
    );
    for option in &question.options {
        let marker = if Some(option.id.as_str()) == selected {
            "*"
        } else {
            " "
        };
        out.push_str(&format!(" {} {}) {}\n", marker, option.label, option.text));
    }
    out
}

pub fn render_summary(summary: &SessionSummary) -> String {
    format!(
        "answered {}/{} ({:.0}%), flagged {}, time left {}",
        summary.answered,
        summary.total_questions,
        summary.progress_percentage,
        summary.flagged,
        format_countdown(summary.remaining_seconds)
    )
}

pub fn render_results(results: &Results) -> String {
    format!(
        "\nSession complete: {}/{} correct, {} of {} answered, score {:.1}%",
        results.correct_answers,
        results.total_questions,
        results.answered_questions,
        results.total_questions,
        results.score_percentage
    )
}

/// Text for an engine event, or `None` for events not worth printing.
pub fn render_event(event: &EngineEvent, questions: &[Question]) -> Option<String> {
    match event {
        EngineEvent::Timer(TimerEvent::TimerTick(tick)) => {
            let on_the_minute = tick.remaining_seconds % 60 == 0;
            let critical = tick.urgency == Urgency::Critical;
            (on_the_minute || critical).then(|| {
                format!("[{} remaining]", format_countdown(tick.remaining_seconds))
            })
        }
        EngineEvent::Timer(TimerEvent::TimeExpired(expired)) => {
            Some(format!("[{}]", expired.message))
        }
        EngineEvent::Updated {
            current_index,
            answer,
            summary,
        } => questions.get(*current_index).map(|q| {
            format!(
                "{}{}",
                render_question(q, *current_index, questions.len(), answer.as_ref()),
                render_summary(summary)
            )
        }),
        EngineEvent::CommandRejected { reason, .. } => Some(format!("! {}", reason)),
        EngineEvent::SubmissionStarted(SubmitTrigger::Manual) => {
            Some("Submitting answers...".to_string())
        }
        EngineEvent::SubmissionStarted(SubmitTrigger::Expiry) => {
            Some("Time is up, submitting answers...".to_string())
        }
        EngineEvent::SubmissionFailed {
            message, retryable, ..
        } => Some(if *retryable {
            format!("! Submission failed: {}. Type 's' to retry.", message)
        } else {
            format!("! Submission failed: {}", message)
        }),
        EngineEvent::Completed(results) => Some(render_results(results)),
        EngineEvent::Abandoned => Some("Session abandoned.".to_string()),
    }
}
