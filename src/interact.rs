//! Blocking user interaction between pipeline stages.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::geom::Point3;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("input closed before an answer was given")]
    Closed,
    #[error("no scripted answer left for `{0}`")]
    Exhausted(String),
    #[error("console I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Source of answers to questions asked during a run.
pub trait Prompt {
    /// Shows `question` and blocks until one line of input is available.
    fn ask(&mut self, question: &str) -> Result<String, PromptError>;

    fn pause(&mut self, message: &str) -> Result<(), PromptError> {
        self.ask(message).map(|_| ())
    }
}

/// Reads answers from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePrompt;

impl Prompt for ConsolePrompt {
    fn ask(&mut self, question: &str) -> Result<String, PromptError> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{question}")?;
        if !question.ends_with('\n') {
            writeln!(stdout)?;
        }
        stdout.flush()?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(PromptError::Closed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_owned())
    }
}

/// Replays a fixed list of answers and records every question asked.
#[derive(Debug, Default, Clone)]
pub struct ScriptedPrompt {
    answers: VecDeque<String>,
    asked: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            asked: Vec::new(),
        }
    }

    #[must_use]
    pub fn asked(&self) -> &[String] {
        &self.asked
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Prompt for ScriptedPrompt {
    fn ask(&mut self, question: &str) -> Result<String, PromptError> {
        self.asked.push(question.to_owned());
        self.answers
            .pop_front()
            .ok_or_else(|| PromptError::Exhausted(question.trim().to_owned()))
    }
}

/// Asks until the answer is one of `options`.
pub fn ask_choice(prompt: &mut dyn Prompt, question: &str, options: &[u32]) -> Result<u32, PromptError> {
    loop {
        let answer = prompt.ask(question)?;
        match answer.trim().parse::<u32>() {
            Ok(choice) if options.contains(&choice) => return Ok(choice),
            _ => log::warn!("`{}` is not one of {options:?}", answer.trim()),
        }
    }
}

pub fn ask_yes_no(prompt: &mut dyn Prompt, question: &str) -> Result<bool, PromptError> {
    loop {
        let answer = prompt.ask(question)?;
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            other => log::warn!("please answer y or n (got `{other}`)"),
        }
    }
}

/// Voxel spacing for mesh rasterization; isotropic unless the user declines.
pub fn ask_spacing(prompt: &mut dyn Prompt) -> Result<[f64; 3], PromptError> {
    if ask_yes_no(prompt, "Use isotropic spacing for mesh rasterization? y/n")? {
        return Ok([1.0, 1.0, 1.0]);
    }
    loop {
        let mut spacing = [0.0; 3];
        for (slot, axis) in spacing.iter_mut().zip(["x", "y", "z"]) {
            *slot = ask_positive(prompt, &format!("Enter {axis} spacing:"))?;
        }
        let question = format!(
            "Is spacing = [{}, {}, {}] okay? y/n",
            spacing[0], spacing[1], spacing[2]
        );
        if ask_yes_no(prompt, &question)? {
            return Ok(spacing);
        }
    }
}

fn ask_positive(prompt: &mut dyn Prompt, question: &str) -> Result<f64, PromptError> {
    loop {
        let answer = prompt.ask(question)?;
        match answer.trim().parse::<f64>() {
            Ok(value) if value.is_finite() && value > 0.0 => return Ok(value),
            _ => log::warn!("`{}` is not a positive number", answer.trim()),
        }
    }
}

static TRIPLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\[?\s*([^,\s\[\]]+)\s*[,\s]\s*([^,\s\[\]]+)\s*[,\s]\s*([^,\s\[\]]+)\s*\]?\s*$")
        .unwrap_or_else(|err| unreachable!("invalid triple pattern: {err}"))
});

/// Parses `x y z`, `x,y,z` or `[x, y, z]`.
#[must_use]
pub fn parse_triple(text: &str) -> Option<[f64; 3]> {
    let captures = TRIPLE.captures(text)?;
    let mut values = [0.0; 3];
    for (slot, index) in values.iter_mut().zip(1..=3) {
        let value: f64 = captures.get(index)?.as_str().parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        *slot = value;
    }
    Some(values)
}

/// Asks for a point until the answer parses.
pub fn ask_point(prompt: &mut dyn Prompt, question: &str) -> Result<Point3, PromptError> {
    loop {
        let answer = prompt.ask(question)?;
        match parse_triple(&answer) {
            Some(coords) => return Ok(Point3::from_array(coords)),
            None => log::warn!("`{}` is not a point; expected `x y z`", answer.trim()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_prompt_replays_and_records() {
        let mut prompt = ScriptedPrompt::new(["a", "b"]);
        assert_eq!(prompt.ask("first?").unwrap(), "a");
        assert_eq!(prompt.ask("second?").unwrap(), "b");
        assert!(matches!(prompt.ask("third?"), Err(PromptError::Exhausted(_))));
        assert_eq!(prompt.asked().len(), 3);
    }

    #[test]
    fn choice_reprompts_until_valid() {
        let mut prompt = ScriptedPrompt::new(["3", "x", "2"]);
        assert_eq!(ask_choice(&mut prompt, "1 or 2?", &[1, 2]).unwrap(), 2);
        assert_eq!(prompt.asked().len(), 3);
    }

    #[test]
    fn isotropic_spacing_is_default() {
        let mut prompt = ScriptedPrompt::new(["y"]);
        assert_eq!(ask_spacing(&mut prompt).unwrap(), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn custom_spacing_reprompts_per_axis() {
        let mut prompt = ScriptedPrompt::new(["n", "0.5", "abc", "-1", "0.7", "2", "y"]);
        assert_eq!(ask_spacing(&mut prompt).unwrap(), [0.5, 0.7, 2.0]);
        assert_eq!(prompt.remaining(), 0);
    }

    #[test]
    fn rejected_spacing_starts_over() {
        let mut prompt = ScriptedPrompt::new(["n", "1", "1", "1", "n", "2", "2", "2", "y"]);
        assert_eq!(ask_spacing(&mut prompt).unwrap(), [2.0, 2.0, 2.0]);
    }

    #[test]
    fn triples_parse_in_common_notations() {
        assert_eq!(parse_triple("1 2 3"), Some([1.0, 2.0, 3.0]));
        assert_eq!(parse_triple("-1.5,2e1, 3"), Some([-1.5, 20.0, 3.0]));
        assert_eq!(parse_triple("[ -1.0, 1.0, -40.5 ]"), Some([-1.0, 1.0, -40.5]));
        assert_eq!(parse_triple("1 2"), None);
        assert_eq!(parse_triple("1 2 three"), None);
        assert_eq!(parse_triple("1 2 inf"), None);
    }
}
