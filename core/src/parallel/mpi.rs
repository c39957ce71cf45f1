use std::{collections::VecDeque, sync::Mutex};

use ::mpi::{
    environment::Universe,
    topology::SimpleCommunicator,
    traits::{Communicator as _, Destination as _, Source as _},
};
use log::debug;

use crate::error::{Error, Result};

use super::{CommError, Communicator, Message};

/// One process of an MPI job. Messages travel as bincode frames; collectives use the same
/// rank-ordered reductions as the in-process backend, so results do not depend on the transport.
pub struct MpiCommunicator {
    world: SimpleCommunicator,
    /// received but not yet consumed
    pending: Mutex<VecDeque<(usize, Message)>>,
    // finalizes MPI when dropped, after `world`
    _universe: Universe,
}

fn encode(message: &Message) -> std::result::Result<Vec<u8>, CommError> {
    bincode::serialize(message).map_err(|e| CommError::Protocol(format!("encoding: {e}")))
}

fn decode(bytes: &[u8]) -> std::result::Result<Message, CommError> {
    bincode::deserialize(bytes).map_err(|e| CommError::Protocol(format!("decoding: {e}")))
}

impl MpiCommunicator {
    /// Initializes MPI. Fails when it was already initialized in this process.
    pub fn initialize() -> Result<Self> {
        let universe = ::mpi::initialize()
            .ok_or_else(|| Error::InvalidConfig("MPI is already initialized".into()))?;
        let world = universe.world();
        debug!("MPI rank {} of {}", world.rank(), world.size());
        Ok(Self {
            world,
            pending: Mutex::new(VecDeque::new()),
            _universe: universe,
        })
    }

    /// Tells every other rank that this one stopped, so nobody waits for it forever.
    pub fn abort(&self) {
        for rank in (0..self.size()).filter(|&rank| rank != self.rank()) {
            // a peer that is already gone does not need to know
            let _ = self.send(rank, Message::Abort);
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
        Ok(pending
            .iter()
            .position(|(source, message)| filter(*source, message))
            .and_then(|index| pending.remove(index)))
    }
}

impl Communicator for MpiCommunicator {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn send(&self, destination: usize, message: Message) -> std::result::Result<(), CommError> {
        if destination >= self.size() {
            return Err(CommError::InvalidRank {
                rank: destination,
                size: self.size(),
            });
        }
        let frame = encode(&message)?;
        self.world.process_at_rank(destination as i32).send(&frame[..]);
        Ok(())
    }

    /// Non-blocking calls only see messages an earlier blocking call already took in.
    fn receive_matching(
        &self,
        filter: &dyn Fn(usize, &Message) -> bool,
        blocking: bool,
    ) -> std::result::Result<Option<(usize, Message)>, CommError> {
        if let Some(entry) = self.take_pending(filter)? {
            return Ok(Some(entry));
        }
        if !blocking {
            return Ok(None);
        }

        loop {
            let (frame, status) = self.world.any_process().receive_vec::<u8>();
            let source = status.source_rank() as usize;
            let message = decode(&frame)?;

            if matches!(message, Message::Abort) {
                return Err(CommError::Aborted { rank: source });
            }
            if filter(source, &message) {
                return Ok(Some((source, message)));
            }
            self.pending
                .lock()
                .map_err(|_| CommError::Protocol("pending queue poisoned".into()))?
                .push_back((source, message));
        }
    }

    fn can_poll(&self) -> bool {
        false
    }
}
