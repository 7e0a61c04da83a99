//! Live reload: connection registry, WebSocket endpoint and file watcher

use anyhow::{anyhow, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use glob::Pattern;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

/// How long changes settle before clients are told
pub const WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Browser-side script; `__PORT__` is replaced with the reload port
const CLIENT_SCRIPT: &str = r#"(function () {
  var host = location.hostname || "localhost";
  var socket = new WebSocket("ws://" + host + ":__PORT__");
  function bust(url) {
    var i = url.indexOf("?");
    return (i === -1 ? url : url.substring(0, i)) + "?" + Date.now();
  }
  socket.onmessage = function (message) {
    var path = message.data;
    console.log("reloader:", path);
    var i, es;
    if (/\.js(\?\d+)?$/.test(path)) {
      es = document.getElementsByTagName("script");
      for (i = 0; i < es.length; i++) {
        if (es[i].src) es[i].src = bust(es[i].src);
      }
    } else if (/\.css$/.test(path)) {
      es = document.getElementsByTagName("link");
      for (i = 0; i < es.length; i++) {
        if (/\.css(\?\d+)?$/.test(es[i].href)) es[i].href = bust(es[i].href);
      }
    } else {
      location.reload();
    }
  };
})();
"#;

/// The client script for a reload channel on `port`
pub fn client_script(port: u16) -> String {
    CLIENT_SCRIPT.replace("__PORT__", &port.to_string())
}

/// Something a change notification can be delivered to
pub trait ReloadSink: Send + Sync {
    fn send(&self, message: &str) -> Result<()>;
}

/// Registry handle of a connected client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

/// Process-wide set of live reload connections
#[derive(Default)]
pub struct ReloadHub {
    clients: Mutex<Vec<(ClientId, Arc<dyn ReloadSink>)>>,
    next_id: AtomicU64,
}

impl ReloadHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn clients(&self) -> MutexGuard<'_, Vec<(ClientId, Arc<dyn ReloadSink>)>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection
    pub fn connect(&self, sink: Arc<dyn ReloadSink>) -> ClientId {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.clients().push((id, sink));
        id
    }

    /// Remove a connection; false if it was already gone
    pub fn disconnect(&self, id: ClientId) -> bool {
        let mut clients = self.clients();
        match clients.iter().position(|(client, _)| *client == id) {
            Some(index) => {
                clients.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of connected clients
    pub fn len(&self) -> usize {
        self.clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send `message` to every client and return how many accepted it.
    /// A failing client is skipped and stays registered until it disconnects.
    pub fn broadcast(&self, message: &str) -> usize {
        let clients = self.clients();
        let mut delivered = 0;
        for (id, sink) in clients.iter() {
            match sink.send(message) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!("reloader: send to {:?} failed: {}", id, e),
            }
        }
        delivered
    }
}

/// Sink feeding a WebSocket task
struct ChannelSink(mpsc::UnboundedSender<String>);

impl ReloadSink for ChannelSink {
    fn send(&self, message: &str) -> Result<()> {
        self.0
            .send(message.to_string())
            .map_err(|_| anyhow!("connection closed"))
    }
}

/// WebSocket handler for live reload
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<ReloadHub>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Forward change notifications to one browser tab until it goes away
async fn handle_socket(mut socket: WebSocket, hub: Arc<ReloadHub>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let id = hub.connect(Arc::new(ChannelSink(tx)));
    tracing::info!("reloader: connect ({})", hub.len());

    loop {
        tokio::select! {
            changed = rx.recv() => {
                match changed {
                    Some(path) => {
                        if socket.send(Message::Text(path)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    hub.disconnect(id);
    tracing::info!("reloader: disconnect ({})", hub.len());
}

/// Decides which changed paths are worth a reload and broadcasts them
pub struct ChangeNotifier {
    root: PathBuf,
    ignore: Vec<Pattern>,
    hub: Arc<ReloadHub>,
}

impl ChangeNotifier {
    /// `ignore` holds glob patterns relative to `root`; invalid ones are logged and dropped
    pub fn new(root: PathBuf, ignore: &[String], hub: Arc<ReloadHub>) -> Self {
        let ignore = ignore
            .iter()
            .filter_map(|pattern| match Pattern::new(pattern) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!("Ignoring invalid watch pattern {:?}: {}", pattern, e);
                    None
                }
            })
            .collect();
        Self { root, ignore, hub }
    }

    /// Broadcast a change to `path`; returns the delivery count, or `None`
    /// when the path is ignored
    pub fn notify(&self, path: &Path) -> Option<usize> {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        if self.is_ignored(relative) {
            return None;
        }

        let message = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");

        tracing::info!("reloader: reloading because of {}", message);
        Some(self.hub.broadcast(&message))
    }

    fn is_ignored(&self, relative: &Path) -> bool {
        let noise = relative.components().any(|c| {
            let name = c.as_os_str().to_string_lossy();
            name == ".git" || name == "node_modules" || name == ".DS_Store"
        });
        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let scratch = name.ends_with('~') || name.ends_with(".swp") || name.ends_with(".swx");

        noise || scratch || self.ignore.iter().any(|p| p.matches_path(relative))
    }
}

/// Watch `notifier.root` recursively for the lifetime of the returned debouncer
pub fn watch(notifier: ChangeNotifier) -> Result<Debouncer<RecommendedWatcher>> {
    let root = notifier.root.clone();

    let mut debouncer = new_debouncer(WATCH_INTERVAL, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                for event in events {
                    notifier.notify(&event.path);
                }
            }
            Err(e) => tracing::error!("Watch error: {:?}", e),
        }
    })?;

    debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;
    tracing::debug!("Watching: {:?}", root);

    Ok(debouncer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Recorder {
        fn messages(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ReloadSink for Recorder {
        fn send(&self, message: &str) -> Result<()> {
            self.0.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    struct Broken;

    impl ReloadSink for Broken {
        fn send(&self, _message: &str) -> Result<()> {
            Err(anyhow!("socket reset"))
        }
    }

    #[test]
    fn test_broadcast_survives_failing_client() {
        let hub = ReloadHub::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        hub.connect(a.clone());
        hub.connect(Arc::new(Broken));
        hub.connect(b.clone());

        assert_eq!(hub.broadcast("pages/index.html"), 2);
        assert_eq!(a.messages(), vec!["pages/index.html"]);
        assert_eq!(b.messages(), vec!["pages/index.html"]);
        assert_eq!(hub.len(), 3);
    }

    #[test]
    fn test_disconnect_by_identity() {
        let hub = ReloadHub::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let id_a = hub.connect(a.clone());
        hub.connect(b.clone());

        assert!(hub.disconnect(id_a));
        assert!(!hub.disconnect(id_a));
        hub.broadcast("x.css");
        assert!(a.messages().is_empty());
        assert_eq!(b.messages(), vec!["x.css"]);
    }

    #[test]
    fn test_messages_arrive_in_order() {
        let hub = ReloadHub::new();
        let a = Arc::new(Recorder::default());
        hub.connect(a.clone());
        for path in ["one.html", "two.css", "three.js"] {
            hub.broadcast(path);
        }
        assert_eq!(a.messages(), vec!["one.html", "two.css", "three.js"]);
    }

    #[test]
    fn test_concurrent_connect_disconnect_broadcast() {
        let hub = Arc::new(ReloadHub::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let hub = hub.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let id = hub.connect(Arc::new(Recorder::default()));
                        hub.broadcast("page.html");
                        assert!(hub.disconnect(id));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_until_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelSink(tx);
        sink.send("static/site.css").unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("static/site.css"));

        drop(rx);
        assert!(sink.send("again").is_err());
    }

    #[test]
    fn test_notifier_sends_relative_paths() {
        let hub = Arc::new(ReloadHub::new());
        let recorder = Arc::new(Recorder::default());
        hub.connect(recorder.clone());
        let notifier = ChangeNotifier::new(PathBuf::from("/site"), &[], hub);

        assert_eq!(notifier.notify(Path::new("/site/static/css/main.css")), Some(1));
        assert_eq!(recorder.messages(), vec!["static/css/main.css"]);
    }

    #[test]
    fn test_notifier_ignores_noise_and_patterns() {
        let hub = Arc::new(ReloadHub::new());
        let notifier = ChangeNotifier::new(
            PathBuf::from("/site"),
            &["public/**".to_string(), "[".to_string()],
            hub,
        );

        assert_eq!(notifier.notify(Path::new("/site/.git/index")), None);
        assert_eq!(notifier.notify(Path::new("/site/pages/a.md~")), None);
        assert_eq!(notifier.notify(Path::new("/site/pages/.a.md.swp")), None);
        assert_eq!(notifier.notify(Path::new("/site/public/index.html")), None);
        assert_eq!(notifier.notify(Path::new("/site/pages/a.md")), Some(0));
    }

    #[test]
    fn test_client_script_port() {
        let script = client_script(4001);
        assert!(script.contains(":4001\""));
        assert!(!script.contains("__PORT__"));
    }
}
