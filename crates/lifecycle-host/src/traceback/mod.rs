//! Handler-focused stack traces for diagnostics.
//!
//! Rhai reports an error raised inside nested script calls as a chain of
//! `ErrorInFunctionCall` and `ErrorInModule` wrappers around the original
//! error. Each wrapper names the function (or module) that was entered and
//! where it was entered from, so walking the chain yields the call frames
//! between the host and the failure. [`TracebackFilter`] keeps only the frames
//! whose source is the loaded handler script, which separates faults in
//! handler code from noise in imported modules and host plumbing.

use std::fmt;
use std::sync::Arc;

use rhai::EvalAltResult;

use crate::executor::CallFailure;

/// Placeholder rendered when no frame belongs to the handler script.
pub const NO_RELEVANT_TRACE: &str = "No relevant stack trace found from the processor script.";

/// Function label used for top-level script and module code.
pub const TOP_LEVEL_FUNCTION: &str = "<module>";

/// One call frame in a traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    source: String,
    function: String,
    line: Option<usize>,
    text: Option<String>,
}

impl Frame {
    /// Creates a frame without source text.
    #[must_use]
    pub fn new(source: impl Into<String>, function: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            source: source.into(),
            function: function.into(),
            line,
            text: None,
        }
    }

    /// Attaches the source line the frame points at.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Source unit the frame executed in.
    #[must_use]
    pub const fn source(&self) -> &str {
        self.source.as_str()
    }

    /// Function the frame executed in.
    #[must_use]
    pub const fn function(&self) -> &str {
        self.function.as_str()
    }

    /// One-based line number, when known.
    #[must_use]
    pub const fn line(&self) -> Option<usize> {
        self.line
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => writeln!(
                f,
                "  File \"{}\", line {line}, in {}",
                self.source, self.function
            )?,
            None => writeln!(f, "  File \"{}\", in {}", self.source, self.function)?,
        }
        if let Some(text) = &self.text {
            writeln!(f, "    {text}")?;
        }
        Ok(())
    }
}

/// Ordered frames, outermost call first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Traceback {
    frames: Vec<Frame>,
}

impl Traceback {
    /// Wraps an ordered list of frames.
    #[must_use]
    pub const fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    /// Retained frames.
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Whether no frame was retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for Traceback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.frames.is_empty() {
            return f.write_str(NO_RELEVANT_TRACE);
        }
        self.frames.iter().try_for_each(|frame| frame.fmt(f))
    }
}

/// Where a traced error entered script code.
///
/// Rhai does not wrap the function the host called in `ErrorInFunctionCall`,
/// so the entry frame is seeded from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint<'a> {
    /// The error escaped the named lifecycle function called by the host.
    Call(&'a str),
    /// The error escaped the handler's top-level initialisation code.
    Initialisation,
}

/// Filters error chains down to frames from one handler script.
#[derive(Debug, Clone)]
pub struct TracebackFilter {
    source: String,
    lines: Arc<[String]>,
}

impl TracebackFilter {
    /// Creates a filter for the handler identified by `source`, whose script
    /// text is used to quote the offending lines.
    #[must_use]
    pub fn new(source: impl Into<String>, script: &str) -> Self {
        Self {
            source: source.into(),
            lines: script.lines().map(str::to_owned).collect(),
        }
    }

    /// Source identity of the handler script.
    #[must_use]
    pub const fn source(&self) -> &str {
        self.source.as_str()
    }

    /// Returns the frames of `error` that belong to the handler script.
    #[must_use]
    pub fn filter(&self, error: &EvalAltResult, entry: EntryPoint<'_>) -> Traceback {
        let frames = call_frames(error, entry, &self.source)
            .into_iter()
            .filter(|frame| self.owns(frame))
            .map(|frame| self.quote(frame))
            .collect();
        Traceback::new(frames)
    }

    /// Converts a failed call of `function` into a [`CallFailure`].
    #[must_use]
    pub fn failure(&self, error: &EvalAltResult, function: &str) -> CallFailure {
        CallFailure::new(root_cause(error).to_string())
            .with_traceback(self.filter(error, EntryPoint::Call(function)))
    }

    // Functions compiled without a recorded source can only come from the
    // handler's own AST; imported modules always carry their resolved path.
    fn owns(&self, frame: &Frame) -> bool {
        frame.source.is_empty() || frame.source == self.source
    }

    fn quote(&self, mut frame: Frame) -> Frame {
        frame.source.clone_from(&self.source);
        let text = frame
            .line
            .and_then(|line| line.checked_sub(1))
            .and_then(|index| self.lines.get(index))
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty());
        frame.text = text;
        frame
    }
}

/// Returns the innermost error of a wrapper chain.
#[must_use]
pub fn root_cause(error: &EvalAltResult) -> &EvalAltResult {
    match error {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _)
        | EvalAltResult::ErrorInModule(_, inner, _) => root_cause(inner),
        other => other,
    }
}

/// Walks a wrapper chain into frames, outermost first.
///
/// A wrapper's position is the call site inside the enclosing frame, so each
/// frame's line comes from the next wrapper down (or from the root cause for
/// the innermost frame).
fn call_frames(
    chain: &EvalAltResult,
    entry: EntryPoint<'_>,
    script_source: &str,
) -> Vec<Frame> {
    let mut frames = Vec::new();
    let entry_function = match entry {
        EntryPoint::Call(function) => function,
        EntryPoint::Initialisation => TOP_LEVEL_FUNCTION,
    };
    let mut current = Some(Frame::new(script_source, entry_function, None));
    let mut error = chain;

    loop {
        let (next, position) = match error {
            EvalAltResult::ErrorInFunctionCall(name, source, inner, position) => {
                (Some((Frame::new(source.as_str(), name.as_str(), None), &**inner)), *position)
            }
            EvalAltResult::ErrorInModule(path, inner, position) => (
                Some((Frame::new(path.as_str(), TOP_LEVEL_FUNCTION, None), &**inner)),
                *position,
            ),
            leaf => (None, leaf.position()),
        };

        if let Some(mut frame) = current.take() {
            frame.line = position.line();
            frames.push(frame);
        }

        match next {
            Some((frame, inner)) => {
                current = Some(frame);
                error = inner;
            }
            None => return frames,
        }
    }
}
