//! Speech from a local program that writes WAV to stdout.
//!
//! Works with piper (`--output_file -`), espeak-ng (`--stdout`) and anything
//! else that can be wrapped in a shell line.

use crate::audio::wav::read_wav_mono;
use crate::error::{ParleyError, Result};
use crate::tts::synthesizer::{SynthesizedAudio, Synthesizer};
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How often a running synthesis process is checked for exit.
const WAIT_POLL: Duration = Duration::from_millis(10);

fn synthesis_error(message: impl Into<String>) -> ParleyError {
    ParleyError::Synthesis {
        message: message.into(),
    }
}

/// Runs one process per chunk of text.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
    voice: String,
    speed: f32,
    timeout: Duration,
}

impl CommandSynthesizer {
    pub fn new(command: &[String], voice: &str, speed: f32, timeout: Duration) -> Result<Self> {
        let Some((program, args)) = command.split_first().filter(|(p, _)| !p.trim().is_empty()) else {
            return Err(ParleyError::ConfigInvalidValue {
                key: "tts.command".to_string(),
                message: "the command backend needs a program to run".to_string(),
            });
        };
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            voice: voice.to_string(),
            speed,
            timeout,
        })
    }

    /// Arguments with placeholders filled in, and whether `{text}` was used.
    fn expand_args(&self, text: &str) -> (Vec<String>, bool) {
        let mut text_in_args = false;
        let args = self
            .args
            .iter()
            .map(|arg| {
                text_in_args |= arg.contains("{text}");
                arg.replace("{voice}", &self.voice)
                    .replace("{speed}", &self.speed.to_string())
                    .replace("{text}", text)
            })
            .collect();
        (args, text_in_args)
    }

    fn run(&self, text: &str) -> Result<Vec<u8>> {
        let (args, text_in_args) = self.expand_args(text);
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(if text_in_args { Stdio::null() } else { Stdio::piped() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| synthesis_error(format!("cannot start {}: {e}", self.program)))?;

        // Readers start before stdin is written so a chatty program never
        // blocks on a full pipe.
        let stdout = child.stdout.take();
        let stdout_reader = thread::spawn(move || {
            let mut buffer = Vec::new();
            if let Some(mut out) = stdout {
                out.read_to_end(&mut buffer)?;
            }
            Ok::<_, std::io::Error>(buffer)
        });
        let stderr = child.stderr.take();
        let stderr_reader = thread::spawn(move || {
            let mut buffer = String::new();
            if let Some(mut err) = stderr {
                err.read_to_string(&mut buffer).ok();
            }
            buffer
        });

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(text.as_bytes()) {
                Ok(()) => {}
                // The program does not read stdin.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => {
                    child.kill().ok();
                    child.wait().ok();
                    return Err(synthesis_error(format!("cannot write to {}: {e}", self.program)));
                }
            }
        }

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                child.kill().ok();
                child.wait().ok();
                return Err(ParleyError::Timeout {
                    operation: format!("speech command {}", self.program),
                });
            }
            thread::sleep(WAIT_POLL);
        };

        let stderr = stderr_reader.join().unwrap_or_default();
        let stdout = stdout_reader
            .join()
            .map_err(|_| synthesis_error("stdout reader panicked"))??;

        if !status.success() {
            return Err(synthesis_error(format!(
                "{} exited with {status}: {}",
                self.program,
                stderr.trim()
            )));
        }
        Ok(stdout)
    }
}

impl Synthesizer for CommandSynthesizer {
    fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        tracing::debug!(program = %self.program, chars = text.len(), "speech command");
        let wav = self.run(text)?;
        let (samples, sample_rate) = read_wav_mono(wav.as_slice())
            .map_err(|e| synthesis_error(format!("{} did not write a WAV: {e}", self.program)))?;
        Ok(SynthesizedAudio {
            samples,
            sample_rate,
        })
    }

    fn name(&self) -> &str {
        "command"
    }
}
