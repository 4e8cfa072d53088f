//! Build a star of participants around a bootnode.

use crate::{Error, Launcher, Role};
use futures::{stream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default number of followers launched at once.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Options shared by every stage.
#[derive(Clone, Debug)]
pub struct Options {
    /// Maximum followers launched at once (at least one).
    pub concurrency: usize,
    /// Aborts the stage (without teardown) when cancelled.
    pub cancel: CancellationToken,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            cancel: CancellationToken::new(),
        }
    }
}

fn annotate(index: usize, err: Error) -> Error {
    match err {
        Error::Canceled => Error::Canceled,
        err => Error::Participant {
            index,
            source: Box::new(err),
        },
    }
}

/// Launch one participant per input: index 0 as the bootnode, then every
/// other index as a follower of index 0.
///
/// Handles are returned in index order. The first failure aborts the stage
/// and is returned annotated with its index; participants already launched
/// are left running.
pub(crate) async fn star<L: Launcher>(
    launcher: &L,
    inputs: Vec<L::Input>,
    options: &Options,
) -> Result<Vec<L::Handle>, Error> {
    let total = inputs.len();
    let mut inputs = inputs.into_iter();
    let Some(first) = inputs.next() else {
        return Ok(Vec::new());
    };

    let bootnode = tokio::select! {
        biased;
        _ = options.cancel.cancelled() => return Err(Error::Canceled),
        result = launcher.launch(0, Role::Bootnode, first) => result.map_err(|err| annotate(0, err))?,
    };
    info!(index = 0, total, "launched bootnode");

    let followers = stream::iter(inputs.enumerate().map(|(offset, input)| {
        let index = offset + 1;
        let role = Role::Follower(bootnode.clone());
        async move {
            let handle = launcher
                .launch(index, role, input)
                .await
                .map_err(|err| annotate(index, err))?;
            debug!(index, "launched follower");
            Ok::<_, Error>(handle)
        }
    }))
    .buffered(options.concurrency.max(1))
    .try_collect::<Vec<_>>();
    let followers = tokio::select! {
        biased;
        _ = options.cancel.cancelled() => return Err(Error::Canceled),
        result = followers => result?,
    };
    info!(followers = followers.len(), "launched followers");

    let mut handles = Vec::with_capacity(total);
    handles.push(bootnode);
    handles.extend(followers);
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Peer;
    use commonware_macros::test_async;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Node {
        id: String,
        discovery: String,
        peer: Option<String>,
    }

    impl Peer for Node {
        fn id(&self) -> &str {
            &self.id
        }

        fn discovery(&self) -> &str {
            &self.discovery
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        launched: Arc<Mutex<Vec<usize>>>,
        fail: Option<usize>,
        cancel_at: Option<(usize, CancellationToken)>,
    }

    impl Launcher for Recorder {
        type Input = ();
        type Handle = Node;

        async fn launch(&self, index: usize, role: Role<Node>, _: ()) -> Result<Node, Error> {
            if let Some((at, token)) = &self.cancel_at {
                if *at == index {
                    token.cancel();
                    futures::future::pending::<()>().await;
                }
            }
            if self.fail == Some(index) {
                return Err(Error::ServiceLaunch {
                    service: format!("node-{index}"),
                    reason: "injected".into(),
                });
            }
            self.launched.lock().unwrap().push(index);
            Ok(Node {
                id: format!("node-{index}"),
                discovery: format!("enode://{index}"),
                peer: role.peer().map(|peer| peer.discovery().to_string()),
            })
        }
    }

    #[test_async]
    async fn test_star_topology() {
        let launcher = Recorder::default();
        let handles = star(&launcher, vec![(); 4], &Options::default())
            .await
            .unwrap();
        assert_eq!(handles.len(), 4);
        assert_eq!(handles[0].peer, None);
        for (index, handle) in handles.iter().enumerate().skip(1) {
            assert_eq!(handle.id, format!("node-{index}"));
            assert_eq!(handle.peer.as_deref(), Some("enode://0"));
        }
        assert_eq!(*launcher.launched.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test_async]
    async fn test_concurrent_preserves_order() {
        let launcher = Recorder::default();
        let options = Options {
            concurrency: 3,
            ..Default::default()
        };
        let handles = star(&launcher, vec![(); 5], &options).await.unwrap();
        let ids: Vec<_> = handles.iter().map(|h| h.id.clone()).collect();
        assert_eq!(ids, ["node-0", "node-1", "node-2", "node-3", "node-4"]);
    }

    #[test_async]
    async fn test_empty() {
        let launcher = Recorder::default();
        let handles = star(&launcher, Vec::new(), &Options::default())
            .await
            .unwrap();
        assert!(handles.is_empty());
    }

    #[test_async]
    async fn test_failure_reports_index() {
        let launcher = Recorder {
            fail: Some(2),
            ..Default::default()
        };
        let err = star(&launcher, vec![(); 4], &Options::default())
            .await
            .unwrap_err();
        assert_eq!(err.index(), Some(2));
        assert!(matches!(
            err,
            Error::Participant { source, .. } if matches!(*source, Error::ServiceLaunch { .. })
        ));

        // Earlier participants stay launched, later ones are never attempted
        assert_eq!(*launcher.launched.lock().unwrap(), vec![0, 1]);
    }

    #[test_async]
    async fn test_bootnode_failure() {
        let launcher = Recorder {
            fail: Some(0),
            ..Default::default()
        };
        let err = star(&launcher, vec![(); 3], &Options::default())
            .await
            .unwrap_err();
        assert_eq!(err.index(), Some(0));
        assert!(launcher.launched.lock().unwrap().is_empty());
    }

    #[test_async]
    async fn test_canceled_before_start() {
        let launcher = Recorder::default();
        let options = Options::default();
        options.cancel.cancel();
        let err = star(&launcher, vec![(); 2], &options).await.unwrap_err();
        assert!(matches!(err, Error::Canceled));
        assert!(launcher.launched.lock().unwrap().is_empty());
    }

    #[test_async]
    async fn test_canceled_mid_stage() {
        let options = Options::default();
        let launcher = Recorder {
            cancel_at: Some((2, options.cancel.clone())),
            ..Default::default()
        };
        let err = star(&launcher, vec![(); 4], &options).await.unwrap_err();
        assert!(matches!(err, Error::Canceled));
        assert_eq!(*launcher.launched.lock().unwrap(), vec![0, 1]);
    }
}
