use std::{
    collections::VecDeque,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Mutex,
    },
    thread,
};

use crate::error::{Error, Result};

use super::{CommError, Communicator, Message};

/// A single worker; there is nobody to talk to.
#[derive(Copy, Clone, Debug, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, destination: usize, _message: Message) -> std::result::Result<(), CommError> {
        Err(CommError::InvalidRank {
            rank: destination,
            size: 1,
        })
    }

    fn receive_matching(
        &self,
        _filter: &dyn Fn(usize, &Message) -> bool,
        blocking: bool,
    ) -> std::result::Result<Option<(usize, Message)>, CommError> {
        if blocking {
            Err(CommError::Protocol(
                "a single worker cannot wait for messages".into(),
            ))
        } else {
            Ok(None)
        }
    }
}

/// One rank of a [`LocalCluster`]: an inbox plus a sender to every rank.
pub struct LocalEndpoint {
    rank: usize,
    inbox: Receiver<(usize, Message)>,
    peers: Vec<Sender<(usize, Message)>>,
    /// received but not yet consumed
    pending: Mutex<VecDeque<(usize, Message)>>,
}

impl LocalEndpoint {
    /// Tells every other rank that this one stopped, so nobody waits for it forever.
    fn abort(&self) {
        for (rank, peer) in self.peers.iter().enumerate() {
            if rank != self.rank {
                // a peer that is already gone does not need to know
                let _ = peer.send((self.rank, Message::Abort));
            }
        }
    }

    fn take_pending(
        &self,
        filter: &dyn Fn(usize, &Message) -> bool,
    ) -> std::result::Result<Option<(usize, Message)>, CommError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| CommError::Protocol("pending queue poisoned".into()))?;

        if let Some(&(source, _)) = pending.iter().find(|(_, m)| matches!(m, Message::Abort)) {
            return Err(CommError::Aborted { rank: source });
        }

        Ok(pending
            .iter()
            .position(|(source, message)| filter(*source, message))
            .and_then(|index| pending.remove(index)))
    }

    fn push_pending(&self, entry: (usize, Message)) -> std::result::Result<(), CommError> {
        self.pending
            .lock()
            .map_err(|_| CommError::Protocol("pending queue poisoned".into()))?
            .push_back(entry);
        Ok(())
    }
}

impl Communicator for LocalEndpoint {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, destination: usize, message: Message) -> std::result::Result<(), CommError> {
        let peer = self.peers.get(destination).ok_or(CommError::InvalidRank {
            rank: destination,
            size: self.peers.len(),
        })?;
        peer.send((self.rank, message))
            .map_err(|_| CommError::Disconnected { rank: destination })
    }

    fn receive_matching(
        &self,
        filter: &dyn Fn(usize, &Message) -> bool,
        blocking: bool,
    ) -> std::result::Result<Option<(usize, Message)>, CommError> {
        if let Some(entry) = self.take_pending(filter)? {
            return Ok(Some(entry));
        }

        loop {
            let (source, message) = if blocking {
                self.inbox
                    .recv()
                    .map_err(|_| CommError::Disconnected { rank: self.rank })?
            } else {
                match self.inbox.try_recv() {
                    Ok(entry) => entry,
                    Err(TryRecvError::Empty) => return Ok(None),
                    Err(TryRecvError::Disconnected) => {
                        return Err(CommError::Disconnected { rank: self.rank })
                    }
                }
            };

            if matches!(message, Message::Abort) {
                return Err(CommError::Aborted { rank: source });
            }
            if filter(source, &message) {
                return Ok(Some((source, message)));
            }
            self.push_pending((source, message))?;
        }
    }
}

/// Sends an abort to the other ranks if the worker thread unwinds.
struct AbortOnPanic<'a>(&'a LocalEndpoint);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort();
        }
    }
}

/// An in-process message-passing group: `size` workers on their own threads, connected only by
/// channels.
pub struct LocalCluster;

impl LocalCluster {
    fn endpoints(size: usize) -> Vec<LocalEndpoint> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| mpsc::channel()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalEndpoint {
                rank,
                inbox,
                peers: senders.clone(),
                pending: Mutex::new(VecDeque::new()),
            })
            .collect()
    }

    /// Runs `worker` on every rank and returns the results in rank order.
    ///
    /// A rank that fails notifies the others, which then fail with
    /// [`CommError::Aborted`]; the error reported is the one that caused the abort.
    pub fn run<R, F>(size: usize, worker: F) -> Result<Vec<R>>
    where
        R: Send,
        F: Fn(&LocalEndpoint) -> Result<R> + Sync,
    {
        if size == 0 {
            return Err(Error::InvalidConfig("a cluster needs at least one worker".into()));
        }

        let worker = &worker;
        let outcomes = thread::scope(|scope| {
            let handles = Self::endpoints(size)
                .into_iter()
                .map(|endpoint| {
                    thread::Builder::new()
                        .name(format!("worker-{}", endpoint.rank))
                        .spawn_scoped(scope, move || {
                            let _guard = AbortOnPanic(&endpoint);
                            let outcome = worker(&endpoint);
                            if outcome.is_err() {
                                endpoint.abort();
                            }
                            outcome
                        })
                })
                .collect::<std::io::Result<Vec<_>>>()?;

            Ok::<_, Error>(
                handles
                    .into_iter()
                    .map(|handle| match handle.join() {
                        Ok(outcome) => outcome,
                        Err(panic) => std::panic::resume_unwind(panic),
                    })
                    .collect::<Vec<_>>(),
            )
        })?;

        let mut results = Vec::with_capacity(size);
        let mut first_abort = None;
        let mut root_cause = None;
        for outcome in outcomes {
            match outcome {
                Ok(value) => results.push(value),
                Err(Error::ParallelCommunicationFailure(CommError::Aborted { rank })) => {
                    first_abort.get_or_insert(rank);
                }
                Err(error) => {
                    root_cause.get_or_insert(error);
                }
            }
        }

        match (root_cause, first_abort) {
            (Some(error), _) => Err(error),
            (None, Some(rank)) => Err(CommError::Aborted { rank }.into()),
            (None, None) => Ok(results),
        }
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::DMatrix;

    use super::{LocalCluster, SerialCommunicator};
    use crate::{
        error::Error,
        parallel::{CommError, Communicator, Message},
    };

    #[test]
    fn all_reduce_sums_in_rank_order() {
        let results = LocalCluster::run(4, |comm| {
            let local = DMatrix::from_element(2, 3, (comm.rank() + 1) as f64);
            Ok(comm.all_reduce(local)?)
        })
        .unwrap();

        assert_eq!(results.len(), 4);
        for reduced in results {
            assert_eq!(reduced, DMatrix::from_element(2, 3, 10.0));
        }
    }

    #[test]
    fn point_to_point_and_barrier() {
        let results = LocalCluster::run(3, |comm| {
            let next = (comm.rank() + 1) % comm.size();
            comm.send(next, Message::Buffer(vec![comm.rank() as f64]))?;
            comm.barrier()?;

            let previous = (comm.rank() + comm.size() - 1) % comm.size();
            let message = comm.receive(previous)?;
            comm.barrier()?;
            Ok(message)
        })
        .unwrap();

        assert_eq!(results[0], Message::Buffer(vec![2.0]));
        assert_eq!(results[1], Message::Buffer(vec![0.0]));
        assert_eq!(results[2], Message::Buffer(vec![1.0]));
    }

    #[test]
    fn failing_rank_aborts_the_group() {
        let result = LocalCluster::run(3, |comm| {
            if comm.rank() == 2 {
                return Err(Error::InvalidInput("rank 2 gives up".into()));
            }
            comm.all_reduce_sum(vec![1.0])?;
            Ok(())
        });

        match result {
            Err(Error::InvalidInput(message)) => assert_eq!(message, "rank 2 gives up"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn serial_communicator() {
        let comm = SerialCommunicator;
        assert_eq!(comm.all_reduce_sum(vec![1.0, 2.0]).unwrap(), vec![1.0, 2.0]);
        comm.barrier().unwrap();
        assert!(matches!(
            comm.send(1, Message::Barrier),
            Err(CommError::InvalidRank { rank: 1, size: 1 })
        ));
        assert_eq!(comm.try_receive_any().unwrap(), None);
    }
}
