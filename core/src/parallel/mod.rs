//! Message passing between workers.
//!
//! Workers share nothing; every exchange of data goes through a [`Communicator`]. Reductions sum
//! contributions in rank order on rank 0 and send the result back, so all ranks end up with
//! bit-identical values.
mod local;
#[cfg(feature = "mpi")]
mod mpi;
mod schedule;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local::{LocalCluster, LocalEndpoint, SerialCommunicator};
#[cfg(feature = "mpi")]
pub use self::mpi::MpiCommunicator;
pub use schedule::{assign_static, contiguous_units, dynamic_schedule, Balancing};

#[derive(Clone, Debug, PartialEq, Error)]
pub enum CommError {
    #[error("rank {rank} is no longer reachable")]
    Disconnected { rank: usize },

    #[error("rank {rank} aborted")]
    Aborted { rank: usize },

    #[error("invalid rank {rank} for a group of {size}")]
    InvalidRank { rank: usize, size: usize },

    #[error("protocol violation: {0}")]
    Protocol(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// A worker asks the coordinator for the next unit of work.
    WorkRequest,
    /// The coordinator's answer; `None` means all units are handed out.
    WorkAssignment(Option<usize>),
    Buffer(Vec<f64>),
    Barrier,
    /// The sender stopped because of an error.
    Abort,
}

/// The transport contract: point-to-point messages plus collective operations built on them.
pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn send(&self, destination: usize, message: Message) -> Result<(), CommError>;

    /// Takes the oldest pending message accepted by `filter`. Messages that do not match stay
    /// queued for later calls. Returns `None` only when `blocking` is false and nothing matches.
    fn receive_matching(
        &self,
        filter: &dyn Fn(usize, &Message) -> bool,
        blocking: bool,
    ) -> Result<Option<(usize, Message)>, CommError>;

    fn receive(&self, source: usize) -> Result<Message, CommError> {
        match self.receive_matching(&|from, _| from == source, true)? {
            Some((_, message)) => Ok(message),
            None => Err(CommError::Disconnected { rank: source }),
        }
    }

    fn receive_any(&self) -> Result<(usize, Message), CommError> {
        self.receive_matching(&|_, _| true, true)?
            .ok_or(CommError::Disconnected { rank: self.rank() })
    }

    fn try_receive_any(&self) -> Result<Option<(usize, Message)>, CommError> {
        self.receive_matching(&|_, _| true, false)
    }

    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    /// Whether a non-blocking receive can see messages that are still in flight. Without it rank 0
    /// only coordinates under dynamic balancing instead of working in between requests.
    fn can_poll(&self) -> bool {
        true
    }

    /// Element-wise sum of `values` over all ranks.
    fn all_reduce_sum(&self, mut values: Vec<f64>) -> Result<Vec<f64>, CommError> {
        let size = self.size();
        if size == 1 {
            return Ok(values);
        }

        let is_buffer = |message: &Message| matches!(message, Message::Buffer(_));

        if self.is_root() {
            for source in 1..size {
                let received = self
                    .receive_matching(&|from, message| from == source && is_buffer(message), true)?;
                let Some((_, Message::Buffer(contribution))) = received else {
                    return Err(CommError::Disconnected { rank: source });
                };
                if contribution.len() != values.len() {
                    return Err(CommError::Protocol(format!(
                        "rank {source} reduced {} values, expected {}",
                        contribution.len(),
                        values.len()
                    )));
                }
                values.iter_mut().zip(&contribution).for_each(|(a, b)| *a += b);
            }

            for destination in 1..size {
                self.send(destination, Message::Buffer(values.clone()))?;
            }
            Ok(values)
        } else {
            self.send(0, Message::Buffer(values))?;
            match self.receive_matching(&|from, message| from == 0 && is_buffer(message), true)? {
                Some((_, Message::Buffer(reduced))) => Ok(reduced),
                _ => Err(CommError::Disconnected { rank: 0 }),
            }
        }
    }

    /// Element-wise sum of a matrix over all ranks.
    fn all_reduce(&self, matrix: DMatrix<f64>) -> Result<DMatrix<f64>, CommError> {
        let (rows, columns) = matrix.shape();
        let reduced = self.all_reduce_sum(matrix.as_slice().to_vec())?;
        Ok(DMatrix::from_vec(rows, columns, reduced))
    }

    /// Returns once every rank has entered the barrier.
    fn barrier(&self) -> Result<(), CommError> {
        let size = self.size();
        if size == 1 {
            return Ok(());
        }

        let is_barrier = |message: &Message| matches!(message, Message::Barrier);
        if self.is_root() {
            for source in 1..size {
                self.receive_matching(&|from, message| from == source && is_barrier(message), true)?;
            }
            for destination in 1..size {
                self.send(destination, Message::Barrier)?;
            }
        } else {
            self.send(0, Message::Barrier)?;
            self.receive_matching(&|from, message| from == 0 && is_barrier(message), true)?;
        }
        Ok(())
    }
}
