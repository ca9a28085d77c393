//! Parsing of typed stdin lines into remote actions.

use flowzone_sync::Command;
use serde_json::Value;
use thiserror::Error;

pub const HELP: &str = "\
commands:
  play | pause | panic | metronome | monitor
  bpm <n>            set tempo
  note <pad> <vel>   trigger a pad (velocity 0..1)
  off <pad>          release a pad
  loop <bars>        set loop length
  mode <category>    switch instrument mode
  gain <val>         set input gain
  riff <id>          load a riff from history
  {...}              send raw JSON
  export             write the diagnostic log
  quit";

/// What a line asks the remote to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Send(Command),
    /// Free-form JSON passed through unchanged.
    Raw(Value),
    Export,
    Help,
    Quit,
    Empty,
}

#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("unknown command {0:?} (try `help`)")]
    Unknown(String),
    #[error("`{0}` expects {1}")]
    Usage(&'static str, &'static str),
    #[error("invalid JSON: {0}")]
    Json(String),
}

pub fn parse_line(line: &str) -> Result<Input, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    if line.starts_with('{') {
        return serde_json::from_str(line)
            .map(Input::Raw)
            .map_err(|e| InputError::Json(e.to_string()));
    }

    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(Input::Empty);
    };
    let args: Vec<&str> = words.collect();

    let command = match (verb, args.as_slice()) {
        ("quit" | "exit", []) => return Ok(Input::Quit),
        ("help" | "?", []) => return Ok(Input::Help),
        ("export", []) => return Ok(Input::Export),
        ("play", []) => Command::TogglePlay,
        ("pause", []) => Command::Pause,
        ("panic", []) => Command::Panic,
        ("metronome", []) => Command::ToggleMetronome,
        ("monitor", []) => Command::ToggleMonitorInput,
        ("bpm", [bpm]) => Command::SetBpm {
            bpm: bpm.parse().map_err(|_| InputError::Usage("bpm", "a number"))?,
        },
        ("note", [pad, val]) => Command::NoteOn {
            pad: pad.parse().map_err(|_| InputError::Usage("note", "<pad 0-255> <velocity>"))?,
            val: val.parse().map_err(|_| InputError::Usage("note", "<pad 0-255> <velocity>"))?,
        },
        ("off", [pad]) => Command::NoteOff {
            pad: pad.parse().map_err(|_| InputError::Usage("off", "a pad 0-255"))?,
        },
        ("loop", [bars]) => Command::SetLoopLength {
            bars: bars.parse().map_err(|_| InputError::Usage("loop", "a bar count"))?,
        },
        ("gain", [val]) => Command::SetInputGain {
            val: val.parse().map_err(|_| InputError::Usage("gain", "a number"))?,
        },
        ("mode", [category]) => Command::SetMode {
            category: category.to_string(),
        },
        ("riff", [id]) => Command::LoadRiff {
            riff_id: id.to_string(),
        },
        ("bpm" | "gain", _) => return Err(InputError::Usage("bpm/gain", "one number")),
        ("note", _) => return Err(InputError::Usage("note", "<pad 0-255> <velocity>")),
        ("loop" | "mode" | "riff" | "off", _) => {
            return Err(InputError::Usage("loop/mode/riff/off", "one argument"))
        }
        (other, _) => return Err(InputError::Unknown(other.to_string())),
    };
    Ok(Input::Send(command))
}
