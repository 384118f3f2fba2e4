use crate::mpd::MpdError;
use crate::status::StatusFlag;
use scroller_proto::store::{StoreError, TitleStore, STOP_TITLE};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
    Paused,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub state: PlayState,
    /// Path or URI of the current item, as the player reports it.
    pub file: Option<String>,
}

/// What the watcher needs from a media player connection.
pub trait Player: Send {
    fn current(&mut self) -> impl Future<Output = Result<NowPlaying, MpdError>> + Send;

    /// Block until playback state changes.
    fn wait_for_playback_event(&mut self) -> impl Future<Output = Result<(), MpdError>> + Send;
}

/// Watcher lifecycle:
///
/// ```text
///   Initializing ──► Connected ──► Watching ──► ShutDown
///        │               │             │
///        └───────────────┴─────────────┴──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Initializing,
    Connected,
    Watching,
    Failed,
    ShutDown,
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("cannot connect to player: {0}")]
    Connect(#[source] MpdError),
    #[error("player protocol error: {0}")]
    Player(#[from] MpdError),
    #[error("player reports an unknown playback state")]
    UnknownState,
    #[error("player is {0:?} but reports no current song")]
    MissingSong(PlayState),
    #[error(transparent)]
    Capacity(#[from] StoreError),
}

/// Title for a player state: basename of the playing item, or `STOP`.
pub fn derive_title(now: &NowPlaying) -> Result<String, WatchError> {
    match now.state {
        PlayState::Playing | PlayState::Paused => {
            let file = now
                .file
                .as_deref()
                .filter(|f| !f.is_empty())
                .ok_or(WatchError::MissingSong(now.state))?;
            Ok(basename(file))
        }
        PlayState::Stopped => Ok(STOP_TITLE.to_string()),
        PlayState::Unknown => Err(WatchError::UnknownState),
    }
}

fn basename(file: &str) -> String {
    match Path::new(file).file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => file.to_string(),
    }
}

pub struct Watcher<P> {
    player: P,
    store: Arc<TitleStore>,
    status: Arc<StatusFlag>,
}

impl<P: Player> Watcher<P> {
    /// Await `connect`, then track the player until shutdown or failure.
    pub async fn run<F>(
        connect: F,
        store: Arc<TitleStore>,
        status: Arc<StatusFlag>,
    ) -> Result<(), WatchError>
    where
        F: Future<Output = Result<P, MpdError>>,
    {
        let mut state = WatcherState::Initializing;
        let player = match connect.await {
            Ok(p) => p,
            Err(e) => {
                transition(&mut state, WatcherState::Failed);
                return Err(WatchError::Connect(e));
            }
        };
        transition(&mut state, WatcherState::Connected);

        let mut watcher = Watcher {
            player,
            store,
            status,
        };
        let result = watcher.watch(&mut state).await;
        match result {
            Ok(()) => transition(&mut state, WatcherState::ShutDown),
            Err(_) => transition(&mut state, WatcherState::Failed),
        }
        result
    }

    async fn watch(&mut self, state: &mut WatcherState) -> Result<(), WatchError> {
        self.refresh().await?;
        transition(state, WatcherState::Watching);

        while self.status.is_running() {
            self.player.wait_for_playback_event().await?;
            if !self.status.is_running() {
                break;
            }
            self.refresh().await?;
        }
        Ok(())
    }

    async fn refresh(&mut self) -> Result<(), WatchError> {
        let now = self.player.current().await?;
        debug!("watcher: player {:?}", now);
        let title = derive_title(&now)?;
        self.store.replace(&title).await?;
        info!("watcher: title {:?}", title);
        Ok(())
    }
}

fn transition(state: &mut WatcherState, next: WatcherState) {
    debug!("watcher: {:?} → {:?}", state, next);
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use scroller_proto::window::DEFAULT_DELIMITER;
    use tokio::sync::mpsc;

    /// Scripted player. Each `wait_for_playback_event` consumes the next
    /// state from the channel; a closed channel reads as a dropped connection.
    struct FakePlayer {
        current: NowPlaying,
        events: mpsc::Receiver<NowPlaying>,
    }

    impl Player for FakePlayer {
        async fn current(&mut self) -> Result<NowPlaying, MpdError> {
            Ok(self.current.clone())
        }

        async fn wait_for_playback_event(&mut self) -> Result<(), MpdError> {
            match self.events.recv().await {
                Some(next) => {
                    self.current = next;
                    Ok(())
                }
                None => Err(MpdError::Closed),
            }
        }
    }

    fn playing(file: &str) -> NowPlaying {
        NowPlaying {
            state: PlayState::Playing,
            file: Some(file.to_string()),
        }
    }

    fn stopped() -> NowPlaying {
        NowPlaying {
            state: PlayState::Stopped,
            file: None,
        }
    }

    fn setup(first: NowPlaying) -> (FakePlayer, mpsc::Sender<NowPlaying>, Arc<TitleStore>, Arc<StatusFlag>) {
        let (tx, rx) = mpsc::channel(8);
        let player = FakePlayer {
            current: first,
            events: rx,
        };
        let status = Arc::new(StatusFlag::new());
        status.start();
        (player, tx, Arc::new(TitleStore::new(DEFAULT_DELIMITER, 64)), status)
    }

    async fn wait_for_title(store: &TitleStore, want: &str) {
        for _ in 0..200 {
            if store.snapshot().await.text == want {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("title never became {:?}", want);
    }

    #[test]
    fn test_derive_title() {
        assert_eq!(
            derive_title(&playing("music/Artist/Album/01 - song.mp3")).unwrap(),
            "01 - song.mp3"
        );
        let paused = NowPlaying {
            state: PlayState::Paused,
            file: Some("b.ogg".into()),
        };
        assert_eq!(derive_title(&paused).unwrap(), "b.ogg");
        assert_eq!(derive_title(&stopped()).unwrap(), "STOP");
        assert!(matches!(
            derive_title(&NowPlaying {
                state: PlayState::Unknown,
                file: None
            }),
            Err(WatchError::UnknownState)
        ));
        assert!(matches!(
            derive_title(&NowPlaying {
                state: PlayState::Playing,
                file: None
            }),
            Err(WatchError::MissingSong(PlayState::Playing))
        ));
    }

    #[test]
    fn test_basename_of_stream_url() {
        assert_eq!(
            derive_title(&playing("http://radio.example/live.mp3")).unwrap(),
            "live.mp3"
        );
    }

    #[tokio::test]
    async fn test_initial_title_and_updates() {
        let (player, tx, store, status) = setup(playing("dir/song.mp3"));
        let task = tokio::spawn(Watcher::run(
            async move { Ok(player) },
            store.clone(),
            status.clone(),
        ));

        wait_for_title(&store, "song.mp3").await;
        store.render_next(5).await.unwrap();
        store.render_next(5).await.unwrap();

        tx.send(stopped()).await.unwrap();
        wait_for_title(&store, "STOP").await;
        assert_eq!(store.render_next(5).await.unwrap().text(), "STOP");

        tx.send(playing("other/next-track.flac")).await.unwrap();
        wait_for_title(&store, "next-track.flac").await;
        assert_eq!(store.snapshot().await.cursor.offset, 0);
        assert_eq!(store.render_next(5).await.unwrap().text(), "next");

        status.request_shutdown();
        tx.send(stopped()).await.unwrap();
        task.await.unwrap().unwrap();
        // the event after shutdown is not applied
        assert_eq!(store.snapshot().await.text, "next-track.flac");
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal() {
        let store = Arc::new(TitleStore::new(DEFAULT_DELIMITER, 64));
        let status = Arc::new(StatusFlag::new());
        status.start();
        let result = Watcher::<FakePlayer>::run(async { Err(MpdError::Closed) }, store, status).await;
        assert!(matches!(result, Err(WatchError::Connect(MpdError::Closed))));
    }

    #[tokio::test]
    async fn test_unknown_state_is_fatal() {
        let (player, tx, store, status) = setup(playing("a.mp3"));
        let task = tokio::spawn(Watcher::run(async move { Ok(player) }, store.clone(), status));
        wait_for_title(&store, "a.mp3").await;
        tx.send(NowPlaying {
            state: PlayState::Unknown,
            file: None,
        })
        .await
        .unwrap();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(WatchError::UnknownState)));
    }

    #[tokio::test]
    async fn test_title_too_long_is_fatal() {
        let long = format!("{}.mp3", "x".repeat(80));
        let (player, _tx, store, status) = setup(playing(&long));
        let result = Watcher::run(async move { Ok(player) }, store.clone(), status).await;
        assert!(matches!(
            result,
            Err(WatchError::Capacity(StoreError::TitleTooLong { .. }))
        ));
        assert_eq!(store.snapshot().await.text, "");
    }

    #[tokio::test]
    async fn test_dropped_connection_is_fatal() {
        let (player, tx, store, status) = setup(stopped());
        drop(tx);
        let result = Watcher::run(async move { Ok(player) }, store, status).await;
        assert!(matches!(result, Err(WatchError::Player(MpdError::Closed))));
    }
}
