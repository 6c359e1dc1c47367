// admin.rs
//
// Parses and dispatches `/kick /ban /unban /mute /help` (spec.md §4.7).
// Grounded on original_source's `server/handler/admin_commands.py`, adapted
// from a dict-dispatch-on-string-key design into a typed `Command` enum.
use std::time::Duration;

use crate::broadcast::Broadcaster;
use crate::connection::ConnectionHandle;
use crate::envelope::{Envelope, Flag};
use crate::policy::MuteTable;
use crate::rate_limiter::RateLimiter;
use crate::registry::Registry;
use crate::store::{BanStore, MessageStore, UserStore};

const HELP_TEXT: &str = "\
Admin Commands:
/kick <username>: Kick a user from the chat.
/ban <username>: Ban a user from reconnecting.
/unban <username>: Unban a user.
/mute <username> <duration>: Temporarily mute a user (e.g. 10s, 2m, 1h).
/help: Show this list.";

enum Command<'a> {
    Help,
    Kick { target: &'a str },
    Ban { target: &'a str },
    Unban { target: &'a str },
    Mute { target: &'a str, duration: &'a str },
}

fn parse(line: &str) -> Result<Command<'_>, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(&cmd) = parts.first() else {
        return Err("unknown command. use /help.".to_string());
    };

    if cmd.eq_ignore_ascii_case("/help") {
        return Ok(Command::Help);
    }

    let known = ["/kick", "/ban", "/unban", "/mute"];
    if !known.iter().any(|k| cmd.eq_ignore_ascii_case(k)) {
        return Err("unknown command. use /help.".to_string());
    }

    let target = match parts.get(1) {
        Some(t) => *t,
        None => return Err("missing target username.".to_string()),
    };

    match cmd.to_ascii_lowercase().as_str() {
        "/kick" => Ok(Command::Kick { target }),
        "/ban" => Ok(Command::Ban { target }),
        "/unban" => Ok(Command::Unban { target }),
        "/mute" => match parts.get(2) {
            Some(duration) => Ok(Command::Mute { target, duration }),
            None => Err("invalid duration. use 10s, 2m, or 1h.".to_string()),
        },
        _ => unreachable!("filtered by `known` above"),
    }
}

/// Strict `/^[0-9]+[smh]$/` parse: digits-only amount, one of `s`/`m`/`h`.
/// Returns `(amount, total_seconds)`.
fn parse_duration(raw: &str) -> Option<(u64, Duration)> {
    let (amount_str, unit) = raw.split_at(raw.len().checked_sub(1)?);
    if amount_str.is_empty() || !amount_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = amount_str.parse().ok()?;
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => return None,
    };
    Some((amount, Duration::from_secs(amount * multiplier)))
}

pub struct AdminEngine<'a> {
    pub registry: &'a Registry,
    pub users: &'a UserStore,
    pub bans: &'a BanStore,
    pub mutes: &'a MuteTable,
    pub rate: &'a RateLimiter,
}

impl<'a> AdminEngine<'a> {
    fn broadcaster(&self) -> Broadcaster<'a> {
        Broadcaster::new(self.registry, self.rate)
    }

    fn reply(&self, addr: std::net::SocketAddr, handle: &ConnectionHandle, message: impl Into<String>) {
        self.broadcaster()
            .send(addr, handle, &Envelope::system(Flag::AdminMsg, message));
    }

    /// `command_line` includes the leading slash, e.g. `"/mute bob 10s"`.
    pub fn dispatch(
        &self,
        sender_addr: std::net::SocketAddr,
        sender_handle: &ConnectionHandle,
        sender_username: &str,
        command_line: &str,
        messages: &MessageStore,
    ) {
        let command = match parse(command_line) {
            Ok(c) => c,
            Err(message) => return self.reply(sender_addr, sender_handle, message),
        };

        let Command::Help = command else {
            let (target, action) = match &command {
                Command::Kick { target } => (*target, "kick"),
                Command::Ban { target } => (*target, "ban"),
                Command::Unban { target } => (*target, "unban"),
                Command::Mute { target, .. } => (*target, "mute"),
                Command::Help => unreachable!("filtered by the outer let-else"),
            };

            if target == sender_username || self.users.is_admin(target) {
                return self.reply(
                    sender_addr,
                    sender_handle,
                    format!("you cannot {action} yourself or another admin."),
                );
            }

            return match command {
                Command::Kick { target } => self.kick(sender_addr, sender_handle, sender_username, target, messages),
                Command::Ban { target } => self.ban(sender_addr, sender_handle, sender_username, target, messages),
                Command::Unban { target } => {
                    self.unban(sender_addr, sender_handle, sender_username, target, messages)
                }
                Command::Mute { target, duration } => {
                    self.mute(sender_addr, sender_handle, sender_username, target, duration, messages)
                }
                Command::Help => unreachable!("filtered by the outer let-else"),
            };
        };

        self.reply(sender_addr, sender_handle, HELP_TEXT);
    }

    fn kick(
        &self,
        sender_addr: std::net::SocketAddr,
        sender_handle: &ConnectionHandle,
        kicked_by: &str,
        target: &str,
        messages: &MessageStore,
    ) {
        let Some((target_addr, target_handle)) = self.registry.find_by_username(target) else {
            return self.reply(sender_addr, sender_handle, format!("user '{target}' is not online."));
        };

        self.registry.remove(target_addr);
        self.rate.remove(target_addr);
        target_handle.shutdown();

        let bc = self.broadcaster();
        bc.broadcast(
            messages,
            &Envelope::system(Flag::Chat, format!("{target} was kicked by [ADMIN] {kicked_by}")),
            None,
        );
        bc.announce_active_users(messages);
        log::warn!("[ADMIN] {kicked_by} kicked {target}");
    }

    fn ban(
        &self,
        sender_addr: std::net::SocketAddr,
        sender_handle: &ConnectionHandle,
        banned_by: &str,
        target: &str,
        messages: &MessageStore,
    ) {
        if !self.users.contains(target) {
            return self.reply(
                sender_addr,
                sender_handle,
                format!("cannot ban '{target}': user does not exist."),
            );
        }

        self.bans.ban(target);

        if let Some((target_addr, target_handle)) = self.registry.find_by_username(target) {
            self.registry.remove(target_addr);
            self.rate.remove(target_addr);
            target_handle.shutdown();
        }

        let bc = self.broadcaster();
        bc.broadcast(
            messages,
            &Envelope::system(Flag::Chat, format!("'{target}' was banned by [ADMIN] {banned_by}")),
            None,
        );
        bc.announce_active_users(messages);
        log::warn!("[ADMIN] {banned_by} banned {target}");
    }

    fn unban(
        &self,
        sender_addr: std::net::SocketAddr,
        sender_handle: &ConnectionHandle,
        unbanned_by: &str,
        target: &str,
        messages: &MessageStore,
    ) {
        if !self.users.contains(target) {
            return self.reply(
                sender_addr,
                sender_handle,
                format!("cannot unban '{target}': user does not exist."),
            );
        }
        if !self.bans.unban(target) {
            return self.reply(
                sender_addr,
                sender_handle,
                format!("cannot unban '{target}': user is not banned."),
            );
        }

        self.broadcaster().broadcast(
            messages,
            &Envelope::system(
                Flag::Chat,
                format!("'{target}' has been unbanned by [ADMIN] {unbanned_by}."),
            ),
            None,
        );
        log::info!("[ADMIN] {unbanned_by} unbanned {target}");
    }

    fn mute(
        &self,
        sender_addr: std::net::SocketAddr,
        sender_handle: &ConnectionHandle,
        muted_by: &str,
        target: &str,
        duration_raw: &str,
        messages: &MessageStore,
    ) {
        let Some((target_addr, target_handle)) = self.registry.find_by_username(target) else {
            return self.reply(
                sender_addr,
                sender_handle,
                format!("cannot mute '{target}': user not in the chat."),
            );
        };

        let Some((amount, total)) = parse_duration(&duration_raw.to_ascii_lowercase()) else {
            return self.reply(sender_addr, sender_handle, "invalid duration. use 10s, 2m, or 1h.");
        };

        self.mutes.install(target, total);

        let bc = self.broadcaster();
        bc.send(target_addr, &target_handle, &Envelope::system(Flag::AdminMute, amount.to_string()));
        bc.broadcast(
            messages,
            &Envelope::system(
                Flag::Chat,
                format!("'{target}' has been muted by [ADMIN] {muted_by} for {duration_raw}."),
            ),
            None,
        );
        log::warn!("[ADMIN] {muted_by} muted {target} for {}s", total.as_secs());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_seconds_minutes_hours() {
        assert_eq!(parse_duration("10s"), Some((10, Duration::from_secs(10))));
        assert_eq!(parse_duration("2m"), Some((2, Duration::from_secs(120))));
        assert_eq!(parse_duration("1h"), Some((1, Duration::from_secs(3600))));
    }

    #[test]
    fn parse_duration_rejects_bad_unit_or_prefix() {
        assert_eq!(parse_duration("10x"), None);
        assert_eq!(parse_duration("abcs"), None);
        assert_eq!(parse_duration("s"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn parse_rejects_unknown_command() {
        assert!(parse("/nope bob").is_err());
    }

    #[test]
    fn parse_help_needs_no_target() {
        assert!(matches!(parse("/help"), Ok(Command::Help)));
    }

    #[test]
    fn parse_requires_target_for_non_help_commands() {
        assert!(parse("/kick").is_err());
    }

    #[test]
    fn parse_mute_requires_duration() {
        assert!(parse("/mute bob").is_err());
        assert!(matches!(parse("/mute bob 10s"), Ok(Command::Mute { target: "bob", duration: "10s" })));
    }
}
