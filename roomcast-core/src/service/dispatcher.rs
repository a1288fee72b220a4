use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::events::{
    ChatMessagePayload, ChatMethodActionPayload, CookieRefreshPayload, Envelope, MethodActionExtra,
    QueueEntrySummary, QueueSyncPayload, StackSyncPayload, StreamLoadPayload, StreamSummary,
    StreamSyncPayload, SubtitlesPayload, UpdateUsernamePayload, UserListEntry, UserListUpdatedPayload,
    playback_status_event,
};
use crate::models::ids::ConnectionId;
use crate::models::namespace::Room;
use crate::models::rbac::Role;
use crate::registry::StreamRegistry;

/// A single registered command's identity, independent of how it executes.
/// Collected into a static table so `help` and alias resolution are
/// data-driven rather than duplicated alongside each handler.
pub struct CommandSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub description: &'static str,
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "help", aliases: &[], description: "List available commands" },
    CommandSpec { name: "clear", aliases: &[], description: "Clear your own chat view" },
    CommandSpec { name: "whoami", aliases: &[], description: "Show your current username" },
    CommandSpec { name: "user", aliases: &[], description: "`user name <name>` or `user list`" },
    CommandSpec { name: "volume", aliases: &[], description: "Adjust playback volume, e.g. `volume +10`" },
    CommandSpec { name: "stream", aliases: &[], description: "`stream info|play|skip|set <url>|pause|stop|seek <t>`" },
    CommandSpec { name: "queue", aliases: &[], description: "`queue add <url>|list mine|room|clear room|mine [url]`" },
    CommandSpec { name: "role", aliases: &["roles"], description: "`role add|set|remove <role> <subject|*>`" },
    CommandSpec { name: "subtitles", aliases: &["sub"], description: "`subtitles off|<path>`" },
    CommandSpec { name: "debug", aliases: &[], description: "Developer utilities" },
];

/// Routes chat-line input: plain text broadcasts as a `chatmessage`,
/// `/`-prefixed lines resolve to a command by primary name or alias and
/// run against a room's playback, queue, and authorizer.
///
/// Command identity lookup is data-driven (the `COMMANDS` table, matching
/// the design's "registry keyed by name" guidance); execution itself is a
/// fixed dispatch rather than a table of boxed async closures, since two of
/// the command groups need to `.await` a stream-registry fetch and stable
/// async fn pointers aren't expressible without extra boxing machinery this
/// design doesn't otherwise need.
pub struct Dispatcher {
    streams: Arc<StreamRegistry>,
    alias_index: HashMap<String, &'static str>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(streams: Arc<StreamRegistry>) -> Self {
        let mut alias_index = HashMap::new();
        for spec in COMMANDS {
            assert!(
                alias_index.insert(spec.name.to_string(), spec.name).is_none(),
                "duplicate command name: {}",
                spec.name
            );
            for alias in spec.aliases {
                assert!(
                    alias_index.insert((*alias).to_string(), spec.name).is_none(),
                    "duplicate command alias: {alias}"
                );
            }
        }
        Self { streams, alias_index }
    }

    #[must_use]
    pub fn help_text() -> String {
        COMMANDS
            .iter()
            .map(|c| format!("{} - {}", c.name, c.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Handle one line of chat input from `caller`. Plain text is broadcast
    /// verbatim; `/`-prefixed lines are parsed as a command. Command errors
    /// become a private system message to the caller and never propagate.
    pub async fn handle_line(&self, room: &Room, caller: ConnectionId, line: &str) {
        let Some(rest) = line.strip_prefix('/') else {
            self.broadcast_chat(room, caller, line);
            return;
        };

        let mut tokens = rest.split_whitespace();
        let Some(head) = tokens.next() else {
            self.system_error(room, caller, "empty command");
            return;
        };
        let args: Vec<String> = tokens.map(str::to_string).collect();

        let resolved = self.alias_index.get(&head.to_lowercase()).copied();
        let result = match resolved {
            Some("help") => self.cmd_help(room, caller),
            Some("clear") => self.cmd_clear(room, caller),
            Some("whoami") => self.cmd_whoami(room, caller),
            Some("user") => self.cmd_user(room, caller, &args),
            Some("volume") => self.cmd_volume(room, caller, &args),
            Some("stream") => self.cmd_stream(room, caller, &args).await,
            Some("queue") => self.cmd_queue(room, caller, &args).await,
            Some("role") => self.cmd_role(room, caller, &args),
            Some("subtitles") => self.cmd_subtitles(room, caller, &args),
            Some("debug") => self.cmd_debug(room, caller, &args),
            _ => Err(Error::UnknownCommand(head.to_string())),
        };
        if let Err(err) = result {
            self.system_error(room, caller, &err.to_string());
        }
    }

    fn broadcast_chat(&self, room: &Room, caller: ConnectionId, message: &str) {
        let username = room.client(&caller).map(|c| c.name().to_string()).unwrap_or_default();
        if let Ok(envelope) = Envelope::new(
            "chatmessage",
            ChatMessagePayload { from: caller, username, message: message.to_string() },
        ) {
            room.broadcast(envelope);
        }
    }

    fn system_error(&self, room: &Room, caller: ConnectionId, message: &str) {
        if let Ok(envelope) = Envelope::new("chatmessage", serde_json::json!({ "message": message })) {
            room.send_to(&caller, envelope);
        }
    }

    fn system_reply(&self, room: &Room, caller: ConnectionId, message: impl Into<String>) {
        if let Ok(envelope) = Envelope::new("chatmessage", serde_json::json!({ "message": message.into() })) {
            room.send_to(&caller, envelope);
        }
    }

    fn cmd_help(&self, room: &Room, caller: ConnectionId) -> Result<()> {
        self.system_reply(room, caller, Self::help_text());
        Ok(())
    }

    fn cmd_clear(&self, room: &Room, caller: ConnectionId) -> Result<()> {
        if let Ok(envelope) = Envelope::new(
            "chatmethodaction",
            ChatMethodActionPayload { extra: MethodActionExtra { methodname: "clearView".to_string(), args: Vec::new() } },
        ) {
            room.send_to(&caller, envelope);
        }
        Ok(())
    }

    fn cmd_whoami(&self, room: &Room, caller: ConnectionId) -> Result<()> {
        let client = room.client(&caller).ok_or(Error::NotInRoom)?;
        self.system_reply(room, caller, client.name().to_string());
        Ok(())
    }

    fn cmd_user(&self, room: &Room, caller: ConnectionId, args: &[String]) -> Result<()> {
        match args.first().map(String::as_str) {
            Some("name") => {
                let new_name = args.get(1).ok_or_else(|| Error::MissingArgument("username".to_string()))?;
                let old_name = room.client(&caller).ok_or(Error::NotInRoom)?.name().to_string();
                room.rename_client(&caller, new_name)?;
                if let Ok(envelope) = Envelope::new(
                    "updateusername",
                    UpdateUsernamePayload { id: caller, old_name: old_name.clone(), new_name: new_name.clone() },
                ) {
                    room.broadcast(envelope);
                }
                if let Ok(envelope) = Envelope::new(
                    "info_updateusername",
                    UpdateUsernamePayload { id: caller, old_name, new_name: new_name.clone() },
                ) {
                    room.broadcast(envelope);
                }
                Ok(())
            }
            Some("list") => {
                let names: Vec<String> = room.clients().into_iter().map(|c| c.name().to_string()).collect();
                self.system_reply(room, caller, names.join(", "));
                Ok(())
            }
            _ => Err(Error::MissingArgument("name|list".to_string())),
        }
    }

    fn cmd_volume(&self, room: &Room, _caller: ConnectionId, args: &[String]) -> Result<()> {
        let raw = args.first().ok_or_else(|| Error::MissingArgument("volume".to_string()))?;
        let (methodname, value) = if let Some(rest) = raw.strip_prefix('+') {
            ("increase".to_string(), rest.to_string())
        } else if let Some(rest) = raw.strip_prefix('-') {
            ("decrease".to_string(), rest.to_string())
        } else {
            ("setVolume".to_string(), raw.clone())
        };
        value.parse::<i64>().map_err(|_| Error::MissingArgument("integer volume".to_string()))?;
        if let Ok(envelope) = Envelope::new(
            "chatmethodaction",
            ChatMethodActionPayload { extra: MethodActionExtra { methodname, args: vec![value] } },
        ) {
            room.broadcast(envelope);
        }
        Ok(())
    }

    async fn cmd_stream(&self, room: &Room, caller: ConnectionId, args: &[String]) -> Result<()> {
        match args.first().map(String::as_str) {
            Some("info") => {
                if let Ok(envelope) = playback_status_event(&room.playback.status()) {
                    room.send_to(&caller, envelope);
                }
                Ok(())
            }
            Some("play") => {
                if room.playback.current().is_some() {
                    room.playback.play()?;
                    self.broadcast_stream_sync(room);
                    Ok(())
                } else {
                    self.skip_to_next(room).await
                }
            }
            Some("skip") => self.skip_to_next(room).await,
            Some("set") | Some("load") => {
                let url = args.get(1).ok_or_else(|| Error::MissingArgument("url".to_string()))?;
                let (stream, _created) = self.streams.get_or_create(url, Some(caller)).await?;
                room.playback.set_stream(stream, Some(caller));
                self.broadcast_stream_load(room);
                Ok(())
            }
            Some("pause") => {
                room.playback.pause()?;
                self.broadcast_stream_sync(room);
                Ok(())
            }
            Some("stop") => {
                room.playback.stop()?;
                self.broadcast_stream_sync(room);
                Ok(())
            }
            Some("seek") => {
                let arg = args.get(1).ok_or_else(|| Error::MissingArgument("seek time".to_string()))?;
                let current = room.playback.timer.time();
                let target = parse_seek(arg, current)?;
                room.playback.seek(target)?;
                self.broadcast_stream_sync(room);
                Ok(())
            }
            _ => Err(Error::MissingArgument("info|play|skip|set|load|pause|stop|seek".to_string())),
        }
    }

    async fn skip_to_next(&self, room: &Room) -> Result<()> {
        room.playback.play_next()?;
        self.broadcast_stream_load(room);
        Ok(())
    }

    fn broadcast_stream_sync(&self, room: &Room) {
        if let Ok(envelope) = Envelope::new("streamsync", StreamSyncPayload { timer: room.playback.timer.status() }) {
            room.broadcast(envelope);
        }
    }

    fn broadcast_stream_load(&self, room: &Room) {
        let Some(current) = room.playback.current() else { return };
        let status = room.playback.status();
        let summary = StreamSummary::from(&*current.lock());
        if let Ok(envelope) = Envelope::new(
            "streamload",
            StreamLoadPayload { stream: summary, started_by: status.started_by, timer: status.timer },
        ) {
            room.broadcast(envelope);
        }
    }

    async fn cmd_queue(&self, room: &Room, caller: ConnectionId, args: &[String]) -> Result<()> {
        match args.first().map(String::as_str) {
            Some("add") => {
                let url = args.get(1).ok_or_else(|| Error::MissingArgument("url".to_string()))?;
                let (stream, _created) = self.streams.get_or_create(url, Some(caller)).await?;
                room.playback.add_to_queue(caller, stream)?;
                self.broadcast_queue_sync(room);
                self.send_stack_sync(room, caller, room.playback.owner_queue_list(&caller));
                Ok(())
            }
            Some("list") => match args.get(1).map(String::as_str) {
                Some("mine") => {
                    self.send_stack_sync(room, caller, room.playback.owner_queue_list(&caller));
                    Ok(())
                }
                Some("room") => {
                    self.send_stack_sync(room, caller, room.playback.room_queue_peek());
                    Ok(())
                }
                _ => Err(Error::MissingArgument("mine|room".to_string())),
            },
            Some("clear") => match args.get(1).map(String::as_str) {
                Some("room") => {
                    room.playback.clear_queue();
                    self.broadcast_queue_sync(room);
                    Ok(())
                }
                Some("mine") => {
                    match args.get(2) {
                        Some(stream_id) => {
                            room.playback.remove_from_queue(&caller, stream_id)?;
                        }
                        None => {
                            room.playback.clear_user_queue(&caller);
                        }
                    }
                    self.broadcast_queue_sync(room);
                    Ok(())
                }
                _ => Err(Error::MissingArgument("room|mine".to_string())),
            },
            _ => Err(Error::MissingArgument("add|list|clear".to_string())),
        }
    }

    fn broadcast_queue_sync(&self, room: &Room) {
        let items: Vec<QueueEntrySummary> = room
            .playback
            .queue_snapshot()
            .into_iter()
            .filter_map(|(owner, items)| items.first().map(|head| QueueEntrySummary { owner, head: StreamSummary::from(&*head.lock()) }))
            .collect();
        if let Ok(envelope) = Envelope::new("queuesync", QueueSyncPayload { items }) {
            room.broadcast(envelope);
        }
    }

    fn send_stack_sync(&self, room: &Room, caller: ConnectionId, items: Vec<crate::models::queue::StreamRef>) {
        let items = items.iter().map(|s| StreamSummary::from(&*s.lock())).collect();
        if let Ok(envelope) = Envelope::new("stacksync", StackSyncPayload { items }) {
            room.send_to(&caller, envelope);
        }
    }

    fn cmd_role(&self, room: &Room, caller: ConnectionId, args: &[String]) -> Result<()> {
        room.authorizer.authorize(&caller, "role/manage")?;

        let op = args.first().map(String::as_str).ok_or_else(|| Error::MissingArgument("add|set|remove".to_string()))?;
        let role_name = args.get(1).ok_or_else(|| Error::MissingArgument("role".to_string()))?;
        let subject_token = args.get(2).ok_or_else(|| Error::MissingArgument("subject|*".to_string()))?;
        let subjects = self.resolve_subjects(room, subject_token)?;

        match op {
            "add" => {
                room.authorizer.add_role(Role::new(role_name.clone(), Vec::new()));
                room.authorizer.bind(role_name, &subjects)?;
            }
            "set" => {
                room.authorizer.add_role(Role::new(role_name.clone(), Vec::new()));
                for other in ["viewer", "user", "admin"] {
                    if other != role_name {
                        for subject in &subjects {
                            let _ = room.authorizer.unbind(other, subject);
                        }
                    }
                }
                room.authorizer.bind(role_name, &subjects)?;
            }
            "remove" => {
                for subject in &subjects {
                    room.authorizer.unbind(role_name, subject)?;
                }
            }
            _ => return Err(Error::MissingArgument("add|set|remove".to_string())),
        }

        for subject in &subjects {
            if let Ok(envelope) = Envelope::new("cookie", CookieRefreshPayload::default()) {
                room.send_to(subject, envelope);
            }
        }
        self.system_reply(room, caller, format!("role {op} applied to {role_name}"));
        self.broadcast_user_list(room);
        Ok(())
    }

    fn resolve_subjects(&self, room: &Room, token: &str) -> Result<Vec<ConnectionId>> {
        if token == "*" {
            Ok(room.clients().into_iter().map(|c| c.id).collect())
        } else {
            let uuid = Uuid::parse_str(token).map_err(|_| Error::SubjectNotFound)?;
            Ok(vec![ConnectionId(uuid)])
        }
    }

    fn broadcast_user_list(&self, room: &Room) {
        let users: Vec<UserListEntry> = room
            .clients()
            .into_iter()
            .map(|c| UserListEntry { id: c.id, name: c.name().to_string(), roles: room.authorizer.roles_of(&c.id) })
            .collect();
        if let Ok(envelope) = Envelope::new("info_userlistupdated", UserListUpdatedPayload { users }) {
            room.broadcast(envelope);
        }
    }

    fn cmd_subtitles(&self, room: &Room, _caller: ConnectionId, args: &[String]) -> Result<()> {
        let arg = args.first().ok_or_else(|| Error::MissingArgument("off|<path>".to_string()))?;
        let path = if arg == "off" { None } else { Some(arg.clone()) };
        if let Ok(envelope) = Envelope::new("info_subtitles", SubtitlesPayload { path }) {
            room.broadcast(envelope);
        }
        Ok(())
    }

    fn cmd_debug(&self, room: &Room, _caller: ConnectionId, args: &[String]) -> Result<()> {
        match args.first().map(String::as_str) {
            Some("refresh") => {
                if let Ok(envelope) = Envelope::new(
                    "chatmethodaction",
                    ChatMethodActionPayload { extra: MethodActionExtra { methodname: "reloadClient".to_string(), args: Vec::new() } },
                ) {
                    room.broadcast(envelope);
                }
                Ok(())
            }
            _ => Err(Error::MissingArgument("refresh".to_string())),
        }
    }
}

/// Parse a seek argument: `+t`/`-t` adjusts relative to `current`, a bare
/// value sets absolute time. `t` is either a plain number of seconds or an
/// `NhNmNs`-style duration.
fn parse_seek(arg: &str, current: f64) -> Result<f64> {
    if let Some(rest) = arg.strip_prefix('+') {
        Ok(current + parse_seconds(rest)?)
    } else if let Some(rest) = arg.strip_prefix('-') {
        Ok(current - parse_seconds(rest)?)
    } else {
        parse_seconds(arg)
    }
}

fn parse_seconds(raw: &str) -> Result<f64> {
    if let Ok(n) = raw.parse::<f64>() {
        return Ok(n);
    }
    humantime::parse_duration(raw)
        .map(|d| d.as_secs_f64())
        .map_err(|_| Error::InvalidSeekTime(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Client, Namespace, RoomName};
    use crate::service::capabilities::{AlwaysPresentFileChecker, NullMetadataFetcher};
    use std::time::Duration;

    fn setup() -> (Arc<Namespace>, Arc<Room>, ConnectionId, Dispatcher) {
        let namespace = Arc::new(Namespace::new(Duration::from_secs(1), 20));
        let room = namespace.get_or_create(&RoomName::from("lobby"));
        let caller = ConnectionId::new();
        room.add_client(Client::new(caller, 2, "alice".to_string())).unwrap();
        let streams = Arc::new(StreamRegistry::new(Arc::new(NullMetadataFetcher), Arc::new(AlwaysPresentFileChecker)));
        (namespace, room, caller, Dispatcher::new(streams))
    }

    #[test]
    fn parse_seek_handles_relative_and_absolute_and_duration_forms() {
        assert_eq!(parse_seek("+30", 100.0).unwrap(), 130.0);
        assert_eq!(parse_seek("-200", 100.0).unwrap(), -100.0);
        assert_eq!(parse_seek("0h1m5s", 0.0).unwrap(), 65.0);
    }

    #[tokio::test]
    async fn plain_text_broadcasts_as_chat() {
        let (_ns, room, caller, dispatcher) = setup();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        room.remove_client(&caller);
        room.add_client(Client::new(caller, 2, "alice".to_string()).with_outbox(tx)).unwrap();

        dispatcher.handle_line(&room, caller, "hello room").await;
        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.event, "chatmessage");
        assert_eq!(envelope.data["message"], "hello room");
    }

    #[tokio::test]
    async fn unknown_command_replies_privately_with_an_error() {
        let (_ns, room, caller, dispatcher) = setup();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        room.remove_client(&caller);
        room.add_client(Client::new(caller, 2, "alice".to_string()).with_outbox(tx)).unwrap();

        dispatcher.handle_line(&room, caller, "/not-a-real-command").await;
        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.event, "chatmessage");
        assert!(envelope.data["message"].as_str().unwrap().contains("unknown command"));
    }

    #[tokio::test]
    async fn stream_pause_without_a_loaded_stream_errors_privately() {
        let (_ns, room, caller, dispatcher) = setup();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        room.remove_client(&caller);
        room.add_client(Client::new(caller, 2, "alice".to_string()).with_outbox(tx)).unwrap();

        dispatcher.handle_line(&room, caller, "/stream pause").await;
        let envelope = rx.try_recv().unwrap();
        assert!(envelope.data["message"].as_str().unwrap().contains("no stream is currently loaded"));
    }

    #[tokio::test]
    async fn stream_set_then_skip_loads_and_serves_from_queue() {
        let (_ns, room, caller, dispatcher) = setup();
        dispatcher.handle_line(&room, caller, "/queue add https://youtu.be/abc").await;
        dispatcher.handle_line(&room, caller, "/stream skip").await;
        assert!(room.playback.current().is_some());
    }

    #[tokio::test]
    async fn user_name_rejects_invalid_without_changing_the_active_name() {
        let (_ns, room, caller, dispatcher) = setup();
        dispatcher.handle_line(&room, caller, "/user name has space").await;
        assert_eq!(room.client(&caller).unwrap().name(), "alice");
    }

    #[test]
    fn command_table_has_no_duplicate_names_or_aliases() {
        let streams = Arc::new(StreamRegistry::new(Arc::new(NullMetadataFetcher), Arc::new(AlwaysPresentFileChecker)));
        let _dispatcher = Dispatcher::new(streams);
    }
}
