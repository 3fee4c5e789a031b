// jukebot-server/src/console.rs
//
// Local stdin console. Stands in for Discord slash commands: every line is a
// command run against one guild on behalf of one member.

use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use std::thread;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use jukebot_common::models::{GuildId, LoopMode, MemberId, PresenceChange, SkipOutcome};
use jukebot_core::Error;
use jukebot_core::eventbus::{BotEvent, EventBus, SessionEvent};
use jukebot_core::playback::{Enqueued, PromptResolution};
use jukebot_core::services::MusicService;

const HELP: &str = "\
Commands:
  help                   - show this help
  guild <id>             - switch the guild commands apply to
  as <member> [name]     - act as another member
  play <url|query>       - queue a track
  next <url|query>       - queue a track at the front
  skip [force]           - vote to skip, or skip outright with 'force'
  pause | resume | stop  - playback control
  restore                - play what a restored session brought back
  leave                  - leave the voice channel and drop the queue
  queue | status         - show the queue
  shuffle | clear        - reorder or empty the pending tracks
  remove <n>             - remove pending track n
  move <from> <to>       - move a pending track
  loop [off|track|queue] - set or cycle the loop mode
  volume <0-200>         - volume in percent
  radio                  - toggle radio
  history [n]            - recently finished tracks
  join <member>          - a member joins the voice channel
  part <member>          - a member leaves the voice channel
  prompt <keep|skip>     - answer the open auto-skip prompt
  quit                   - shut the bot down";

/// Who the console is acting as.
#[derive(Debug, Clone)]
pub struct ConsoleContext {
    pub guild: GuildId,
    pub member: MemberId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

pub struct Console {
    service: Arc<MusicService>,
    event_bus: Arc<EventBus>,
}

fn parse_id(raw: Option<&&str>, what: &str) -> Result<u64, Error> {
    let raw = raw.ok_or_else(|| Error::Validation(format!("missing {what}")))?;
    raw.parse::<u64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| Error::Validation(format!("invalid {what} '{raw}'")))
}

/// Positions are 1-based on the console.
fn parse_position(raw: Option<&&str>) -> Result<usize, Error> {
    Ok(parse_id(raw, "position")? as usize - 1)
}

impl Console {
    pub fn new(service: Arc<MusicService>, event_bus: Arc<EventBus>) -> Self {
        Self { service, event_bus }
    }

    /// Prints session notifications until the bus shuts down.
    pub async fn spawn_notifier(&self) -> JoinHandle<()> {
        let mut rx = self.event_bus.subscribe(None).await;
        let mut shutdown_rx = self.event_bus.shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    maybe = rx.recv() => {
                        let Some(event) = maybe else { break };
                        if let Some(line) = describe(&event) {
                            println!("\n[{}] {}", event.event_type(), line);
                        }
                    }
                }
            }
            debug!("Console notifier stopped");
        })
    }

    /// Reads commands from stdin on a dedicated thread. Returns immediately.
    pub fn spawn_console_thread(self: Arc<Self>, runtime: Handle, mut ctx: ConsoleContext) {
        thread::spawn(move || {
            println!("Console enabled. Type 'help' for commands.");
            let mut reader = BufReader::new(std::io::stdin());

            loop {
                print!("jukebot> ");
                let _ = std::io::stdout().flush();

                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        eprintln!("Error reading from stdin: {e}");
                        break;
                    }
                }
                if self.event_bus.is_shutdown() {
                    break;
                }

                match runtime.block_on(self.execute(&mut ctx, line.trim())) {
                    Ok(Reply::Text(text)) if text.is_empty() => {}
                    Ok(Reply::Text(text)) => println!("{text}"),
                    Ok(Reply::Quit) => break,
                    Err(e) => println!("Error: {e}"),
                }
            }
            println!("Console shutting down...");
        });
    }

    pub async fn execute(&self, ctx: &mut ConsoleContext, line: &str) -> Result<Reply, Error> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&cmd, args)) = parts.split_first() else {
            return Ok(Reply::Text(String::new()));
        };
        let rest = args.join(" ");
        let svc = &self.service;
        let guild = ctx.guild;

        let text = match cmd {
            "help" => HELP.to_string(),
            "guild" => {
                let id = parse_id(args.first(), "guild id")?;
                ctx.guild = GuildId::new(id);
                format!("Now controlling guild {id}")
            }
            "as" => {
                let id = parse_id(args.first(), "member id")?;
                ctx.member = MemberId::new(id);
                ctx.name = args.get(1).map(|s| s.to_string()).unwrap_or_else(|| format!("member-{id}"));
                format!("Acting as {} ({id})", ctx.name)
            }
            "play" | "next" => {
                if rest.is_empty() {
                    return Err(Error::Validation(format!("usage: {cmd} <url|query>")));
                }
                let enqueued = if cmd == "play" {
                    svc.play(guild, ctx.member, &ctx.name, &rest).await?
                } else {
                    svc.play_next(guild, ctx.member, &ctx.name, &rest).await?
                };
                match enqueued {
                    Enqueued::Started(track) => format!("Now playing: {}", track.display_title()),
                    Enqueued::Queued { position } => format!("Queued at #{position}"),
                }
            }
            "skip" => {
                let force = args.first() == Some(&"force");
                match svc.skip(guild, ctx.member, force).await? {
                    SkipOutcome::Skipped { track, .. } => format!("Skipped {}", track.display_title()),
                    SkipOutcome::Voted(v) => {
                        format!("Vote recorded ({}/{})", v.current_count, v.required_count)
                    }
                }
            }
            "pause" => {
                svc.pause(guild).await?;
                "Paused".to_string()
            }
            "resume" => {
                svc.resume(guild).await?;
                "Resumed".to_string()
            }
            "stop" => {
                svc.stop(guild).await?;
                "Stopped".to_string()
            }
            "restore" => match svc.resume_restored(guild).await? {
                Some(track) => format!("Now playing: {}", track.display_title()),
                None => "Nothing to restore".to_string(),
            },
            "leave" => {
                svc.leave(guild).await?;
                "Left the voice channel".to_string()
            }
            "queue" | "status" => {
                let status = svc.status(guild).await?;
                let mut out = format!(
                    "State: {}  Loop: {}  Volume: {:.0}%",
                    status.state,
                    status.loop_mode,
                    status.volume * 100.0
                );
                if let Some(track) = &status.now_playing {
                    out.push_str(&format!("\nNow playing: {}", track.display_title()));
                }
                for (i, track) in status.pending.iter().enumerate() {
                    out.push_str(&format!("\n  {:>2}. {}", i + 1, track.display_title()));
                }
                if let Some(id) = status.prompt_id {
                    out.push_str(&format!("\nOpen prompt: {id}"));
                }
                out
            }
            "shuffle" => format!("Shuffled {} tracks", svc.shuffle(guild).await?),
            "clear" => format!("Cleared {} tracks", svc.clear(guild).await?),
            "remove" => {
                let removed = svc.remove(guild, parse_position(args.first())?).await?;
                format!("Removed {}", removed.display_title())
            }
            "move" => {
                let from = parse_position(args.first())?;
                let to = parse_position(args.get(1))?;
                svc.move_track(guild, from, to).await?;
                format!("Moved #{} to #{}", from + 1, to + 1)
            }
            "loop" => {
                let mode = match args.first() {
                    Some(raw) => Some(raw.parse::<LoopMode>()?),
                    None => None,
                };
                format!("Loop mode: {}", svc.set_loop(guild, mode).await?)
            }
            "volume" => {
                let percent: f32 = args
                    .first()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| Error::Validation("usage: volume <0-200>".into()))?;
                svc.set_volume(guild, percent / 100.0).await?;
                format!("Volume set to {percent:.0}%")
            }
            "radio" => {
                if svc.toggle_radio(guild).await? {
                    "Radio on".to_string()
                } else {
                    "Radio off".to_string()
                }
            }
            "history" => {
                let limit = args.first().and_then(|s| s.parse().ok()).unwrap_or(10);
                let entries = svc.history(guild, limit).await?;
                if entries.is_empty() {
                    "No history yet".to_string()
                } else {
                    entries
                        .iter()
                        .map(|e| {
                            format!(
                                "  {} {} ({})",
                                e.finished_at.format("%H:%M:%S"),
                                e.track.display_title(),
                                e.outcome
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            "join" | "part" => {
                let member = MemberId::new(parse_id(args.first(), "member id")?);
                let change = if cmd == "join" { PresenceChange::Joined } else { PresenceChange::Left };
                svc.presence(guild, member, change).await;
                format!("{member} {}", if cmd == "join" { "joined" } else { "left" })
            }
            "prompt" => {
                let keep = match args.first() {
                    Some(&"keep") | Some(&"yes") => true,
                    Some(&"skip") | Some(&"no") => false,
                    _ => return Err(Error::Validation("usage: prompt <keep|skip>".into())),
                };
                let prompt_id = svc
                    .status(guild)
                    .await?
                    .prompt_id
                    .ok_or_else(|| Error::NotFound("no open prompt".into()))?;
                match svc.answer_prompt(guild, prompt_id, keep).await? {
                    PromptResolution::Kept => "Keeping the current track".to_string(),
                    PromptResolution::Skipped(_) => "Skipped".to_string(),
                }
            }
            "quit" | "exit" => {
                self.event_bus.shutdown();
                return Ok(Reply::Quit);
            }
            other => {
                error!("Console: unknown command '{}'", other);
                format!("Unknown command '{other}'. Type 'help' for usage.")
            }
        };
        Ok(Reply::Text(text))
    }
}

fn describe(event: &BotEvent) -> Option<String> {
    let BotEvent::Session(ev) = event else {
        return match event {
            BotEvent::SystemMessage(msg) => Some(msg.clone()),
            _ => None,
        };
    };
    let line = match ev {
        SessionEvent::TrackStarted { guild_id, track } => {
            format!("guild {guild_id}: now playing {}", track.display_title())
        }
        SessionEvent::TrackFinished { guild_id, track, outcome } => {
            format!("guild {guild_id}: {} {}", track.display_title(), outcome)
        }
        SessionEvent::QueueLow { .. } => return None,
        SessionEvent::QueueExhausted { guild_id } => format!("guild {guild_id}: queue finished"),
        SessionEvent::SessionRestored { guild_id, tracks } => {
            format!("guild {guild_id}: restored {tracks} tracks, use 'restore' to play them")
        }
        SessionEvent::SessionClosed { guild_id } => format!("guild {guild_id}: session closed"),
        SessionEvent::PlaybackFailed { guild_id, attempts } => {
            format!("guild {guild_id}: gave up after {attempts} failed tracks")
        }
        SessionEvent::AutoSkipPromptRequested { guild_id, track, expires_at, .. } => format!(
            "guild {guild_id}: the requester of {} left. Keep playing? ('prompt keep' or 'prompt skip', expires {})",
            track.display_title(),
            expires_at.format("%H:%M:%S")
        ),
        SessionEvent::RadioDisabled { guild_id, reason } => format!("guild {guild_id}: {reason}"),
    };
    Some(line)
}
