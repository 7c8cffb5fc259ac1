//! Actor
//!
//! Plays a script against one client connection.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::channel::Channel;
use crate::error::{StubError, StubResult};
use crate::script::{Script, ScriptState};
use crate::wire::Wire;

/// Signals the service sends to its running actors.
#[derive(Debug, Clone, Default)]
pub struct ActorControls {
    /// Finish the script early if the rest of it may be left out
    pub skip: CancellationToken,
    /// Drop the connection
    pub exit: CancellationToken,
}

fn exit_requested() -> StubError {
    StubError::server_exit("Actor exit on request")
}

/// Run `fut` unless an exit is requested first.
async fn unless_exit<T>(
    exit: &CancellationToken,
    fut: impl Future<Output = StubResult<T>>,
) -> StubResult<T> {
    tokio::select! {
        biased;
        _ = exit.cancelled() => Err(exit_requested()),
        res = fut => res,
    }
}

/// One client connection playing through a script.
pub struct Actor {
    script: Arc<Script>,
    state: ScriptState,
    channel: Channel,
    controls: ActorControls,
}

impl Actor {
    /// Create an actor with a fresh script state.
    pub fn new(script: Arc<Script>, wire: Wire, controls: ActorControls) -> Self {
        let channel = Channel::new(wire, script.protocol(), &script.context);
        let state = script.new_state();
        Self {
            script,
            state,
            channel,
            controls,
        }
    }

    fn log(&self, msg: impl std::fmt::Display) {
        info!("{}{}", self.channel.prefix(), msg);
    }

    /// Handshake and play the script to its end.
    ///
    /// A connection that breaks is fine as long as the rest of the script
    /// could have been skipped.
    pub async fn play(&mut self) -> StubResult<()> {
        unless_exit(&self.controls.exit, self.channel.negotiate_transport()).await?;
        unless_exit(&self.controls.exit, self.channel.preamble()).await?;
        unless_exit(&self.controls.exit, self.channel.version_handshake()).await?;

        match self.run().await {
            Ok(()) => {}
            Err(err) if err.is_connection_lost() => {
                self.log(format_args!("S: <BROKEN> {:?}", err));
                self.script.try_skip_to_end(&mut self.state);
                if !self.script.done(&self.state) {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
        self.log("Script finished");
        Ok(())
    }

    async fn run(&mut self) -> StubResult<()> {
        self.script.init(&mut self.state, &mut self.channel).await?;
        let mut skip_applied = false;
        loop {
            if self.controls.exit.is_cancelled() {
                return Err(exit_requested());
            }
            if self.script.done(&self.state) {
                return Ok(());
            }
            // Wait for input without holding any script state, so that
            // signals are handled between messages.
            tokio::select! {
                biased;
                _ = self.controls.exit.cancelled() => return Err(exit_requested()),
                _ = self.controls.skip.cancelled(), if !skip_applied => {
                    skip_applied = true;
                    self.script.try_skip_to_end(&mut self.state);
                    continue;
                }
                peeked = self.channel.peek() => {
                    peeked?;
                }
            }
            self.script.consume(&mut self.state, &mut self.channel).await?;
        }
    }

    /// Whether the script has been played to its end.
    pub fn done(&self) -> bool {
        self.script.done(&self.state)
    }

    /// Log prefix of the connection.
    pub fn prefix(&self) -> &str {
        self.channel.prefix()
    }

    /// Hang up.
    pub async fn close(&mut self) {
        self.channel.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::{BoltCodec, PackStreamVersion, Structure, Value};
    use futures::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio_util::codec::Framed;

    const HANDSHAKE_4_4: [u8; 20] = [
        0x60, 0x60, 0xB0, 0x17, 0, 0, 4, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    ];

    fn actor(text: &str) -> (Actor, DuplexStream, ActorControls) {
        let script = Arc::new(Script::parse(text).unwrap());
        let (server, client) = tokio::io::duplex(64 * 1024);
        let controls = ActorControls::default();
        let actor = Actor::new(script, Wire::new(server), controls.clone());
        (actor, client, controls)
    }

    async fn connect(mut client: DuplexStream) -> Framed<DuplexStream, BoltCodec> {
        client.write_all(&HANDSHAKE_4_4).await.unwrap();
        let mut response = [0u8; 4];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(response, [0, 0, 4, 4]);
        Framed::new(client, BoltCodec::new(PackStreamVersion::V1))
    }

    fn hello() -> Structure {
        Structure::new(0x01, vec![Value::Map(Default::default())])
    }

    #[tokio::test]
    async fn test_play_to_end() {
        let (mut actor, client, _) =
            actor("!: BOLT 4.4\nC: HELLO {\"{}\": {}}\nS: SUCCESS {}\nC: GOODBYE\nS: <EXIT>");
        let play = tokio::spawn(async move {
            let res = actor.play().await;
            (res, actor.done())
        });
        let mut client = connect(client).await;
        client.send(&hello()).await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap().tag, 0x70);
        client.send(&Structure::new(0x02, Vec::new())).await.unwrap();

        let (res, _) = play.await.unwrap();
        match res {
            Err(StubError::ServerExit(reason)) => {
                assert!(reason.starts_with("server exit as part of the script:"))
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_finishes_without_exit() {
        let (mut actor, client, _) = actor("!: BOLT 4.4\nC: HELLO {\"{}\": {}}\nS: SUCCESS {}");
        let play = tokio::spawn(async move {
            let res = actor.play().await;
            (res, actor.done())
        });
        let mut client = connect(client).await;
        client.send(&hello()).await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap().tag, 0x70);

        let (res, done) = play.await.unwrap();
        assert!(res.is_ok());
        assert!(done);
    }

    #[tokio::test]
    async fn test_hangup_on_skippable_rest() {
        let (mut actor, client, _) =
            actor("!: BOLT 4.4\nC: HELLO {\"{}\": {}}\nS: SUCCESS {}\n?: GOODBYE");
        let play = tokio::spawn(async move { actor.play().await });
        let mut client = connect(client).await;
        client.send(&hello()).await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap().tag, 0x70);
        drop(client);

        assert!(play.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_hangup_mid_script() {
        let (mut actor, client, _) =
            actor("!: BOLT 4.4\nC: HELLO {\"{}\": {}}\nS: SUCCESS {}\nC: GOODBYE");
        let play = tokio::spawn(async move { actor.play().await });
        let mut client = connect(client).await;
        client.send(&hello()).await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap().tag, 0x70);
        drop(client);

        let err = play.await.unwrap().unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_deviation_fails() {
        let (mut actor, client, _) = actor("!: BOLT 4.4\nC: HELLO {\"{}\": {}}");
        let play = tokio::spawn(async move { actor.play().await });
        let mut client = connect(client).await;
        client.send(&Structure::new(0x0F, Vec::new())).await.unwrap();

        let err = play.await.unwrap().unwrap_err();
        assert!(err.is_script_failure());
    }

    #[tokio::test]
    async fn test_skip_request() {
        let (mut actor, client, controls) =
            actor("!: BOLT 4.4\nC: HELLO {\"{}\": {}}\nS: SUCCESS {}\n{*\nC: RESET\n*}");
        let play = tokio::spawn(async move {
            let res = actor.play().await;
            (res, actor.done())
        });
        let mut client = connect(client).await;
        client.send(&hello()).await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap().tag, 0x70);

        controls.skip.cancel();
        let (res, done) = tokio::time::timeout(Duration::from_secs(5), play)
            .await
            .unwrap()
            .unwrap();
        assert!(res.is_ok());
        assert!(done);
    }

    #[tokio::test]
    async fn test_skip_request_on_required_rest() {
        let (mut actor, client, controls) =
            actor("!: BOLT 4.4\nC: HELLO {\"{}\": {}}\nS: SUCCESS {}\nC: RESET\nS: SUCCESS {}");
        let play = tokio::spawn(async move { actor.play().await });
        let mut client = connect(client).await;
        client.send(&hello()).await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap().tag, 0x70);

        // The rest is required, so the actor keeps playing.
        controls.skip.cancel();
        client.send(&Structure::new(0x0F, Vec::new())).await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap().tag, 0x70);
        assert!(play.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_exit_request() {
        let (mut actor, client, controls) =
            actor("!: BOLT 4.4\nC: HELLO {\"{}\": {}}\nS: SUCCESS {}");
        let play = tokio::spawn(async move { actor.play().await });
        let _client = connect(client).await;

        controls.exit.cancel();
        match play.await.unwrap() {
            Err(StubError::ServerExit(reason)) => assert_eq!(reason, "Actor exit on request"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    const PULL_LOOP: &str = "!: BOLT 4.4
C: HELLO {\"{}\": {}}
S: SUCCESS {}
{*
    C: PULL {\"{}\": {}}
    S: SUCCESS {}
*}
C: GOODBYE
S: <EXIT>
";

    fn pull() -> Structure {
        Structure::new(0x3F, vec![Value::Map(Default::default())])
    }

    fn goodbye() -> Structure {
        Structure::new(0x02, Vec::new())
    }

    #[tokio::test]
    async fn test_repeated_pulls_reach_exit() {
        for pulls in [0, 1, 5] {
            let (mut actor, client, _) = actor(PULL_LOOP);
            let play = tokio::spawn(async move {
                let res = actor.play().await;
                (res, actor.done())
            });
            let mut client = connect(client).await;
            client.send(&hello()).await.unwrap();
            assert_eq!(client.next().await.unwrap().unwrap().tag, 0x70);
            for _ in 0..pulls {
                client.send(&pull()).await.unwrap();
                assert_eq!(client.next().await.unwrap().unwrap().tag, 0x70);
            }
            client.send(&goodbye()).await.unwrap();

            let (res, done) = play.await.unwrap();
            assert!(
                matches!(res, Err(StubError::ServerExit(_))),
                "{} pulls: {:?}",
                pulls,
                res
            );
            assert!(done, "{} pulls", pulls);
        }
    }

    const RESET_OR_GOODBYE: &str = "!: BOLT 4.4
C: HELLO {\"{}\": {}}
S: SUCCESS {}
{{
    C: RESET
    S: SUCCESS {}
----
    C: GOODBYE
    S: <EXIT>
}}
";

    #[tokio::test]
    async fn test_first_alternative() {
        let (mut actor, client, _) = actor(RESET_OR_GOODBYE);
        let play = tokio::spawn(async move {
            let res = actor.play().await;
            (res, actor.done())
        });
        let mut client = connect(client).await;
        client.send(&hello()).await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap().tag, 0x70);
        client.send(&Structure::new(0x0F, Vec::new())).await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap().tag, 0x70);

        let (res, done) = play.await.unwrap();
        assert!(res.is_ok());
        assert!(done);
    }

    #[tokio::test]
    async fn test_second_alternative() {
        let (mut actor, client, _) = actor(RESET_OR_GOODBYE);
        let play = tokio::spawn(async move {
            let res = actor.play().await;
            (res, actor.done())
        });
        let mut client = connect(client).await;
        client.send(&hello()).await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap().tag, 0x70);
        client.send(&goodbye()).await.unwrap();

        let (res, done) = play.await.unwrap();
        assert!(matches!(res, Err(StubError::ServerExit(_))));
        assert!(done);
    }

    #[tokio::test]
    async fn test_noop_reaches_client() {
        let (mut actor, client, _) = actor(
            "!: BOLT 4.4\nC: HELLO {\"{}\": {}}\nS: SUCCESS {}\n   <NOOP>\nC: RESET\nS: SUCCESS {}",
        );
        let play = tokio::spawn(async move {
            let res = actor.play().await;
            (res, actor.done())
        });
        let mut client = connect(client).await;
        client.send(&hello()).await.unwrap();
        // read raw chunks from here on, the codec would drop the NOOP
        let mut client = client.into_inner();

        let mut success = [0u8; 7];
        client.read_exact(&mut success).await.unwrap();
        assert_eq!(success, [0x00, 0x03, 0xB1, 0x70, 0xA0, 0x00, 0x00]);
        let mut noop = [0u8; 2];
        client.read_exact(&mut noop).await.unwrap();
        assert_eq!(noop, [0x00, 0x00]);

        client
            .write_all(&[0x00, 0x02, 0xB0, 0x0F, 0x00, 0x00])
            .await
            .unwrap();
        client.read_exact(&mut success).await.unwrap();
        assert_eq!(success, [0x00, 0x03, 0xB1, 0x70, 0xA0, 0x00, 0x00]);

        let (res, done) = play.await.unwrap();
        assert!(res.is_ok());
        assert!(done);
    }

    #[tokio::test]
    async fn test_exit_before_handshake() {
        let (mut actor, _client, controls) = actor("!: BOLT 4.4\nC: HELLO {\"{}\": {}}");
        controls.exit.cancel();
        assert!(matches!(actor.play().await, Err(StubError::ServerExit(_))));
    }
}
