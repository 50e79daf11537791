//! Readiness classification for poll events.
//!
//! The multiplexer reports raw readable/writable flags; the reactor
//! dispatches on a closed set of readiness kinds instead, so the event
//! loop's `match` is exhaustive and "acceptable" is not conflated with
//! "readable on a data socket".

/// The kinds of readiness a ready handle can report.
///
/// Only the listener reports `Acceptable`; data sockets report
/// `Readable` and/or `Writable`, possibly both in one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Acceptable,
    Readable,
    Writable,
}

impl Readiness {
    /// Classify one poll event into the readiness kinds it carries.
    pub fn classify(
        is_listener: bool,
        is_readable: bool,
        is_writable: bool,
    ) -> impl Iterator<Item = Readiness> {
        [
            (is_listener && is_readable).then_some(Readiness::Acceptable),
            (!is_listener && is_readable).then_some(Readiness::Readable),
            (!is_listener && is_writable).then_some(Readiness::Writable),
        ]
        .into_iter()
        .flatten()
    }
}
