//! Queue of GATT client requests used to configure a peer's CCCD
//!
//! The stack accepts one outstanding client write at a time. Requests are kept
//! here and handed over one by one: a request leaves the queue only once the
//! stack has accepted it, otherwise it is retried on the next write response.

use super::gatt::{cccd_value, GattcWriteParams, WriteOp};
use super::stack::SoftDevice;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::debug;

/// Number of requests the queue holds
pub const TX_BUFFER_SIZE: usize = 8;

/// Errors for CCCD queue operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CccdError {
    #[error("CCCD request queue full")]
    QueueFull,
}

/// A pending GATT client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxRequest {
    Read { conn_handle: u16, handle: u16 },
    Write { conn_handle: u16, params: GattcWriteParams },
}

/// Bounded FIFO of GATT client requests
#[derive(Debug)]
pub struct CccdTxQueue {
    queue: VecDeque<TxRequest>,
    capacity: usize,
}

impl CccdTxQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    /// Next request to be handed to the stack
    pub fn peek(&self) -> Option<&TxRequest> {
        self.queue.front()
    }

    fn enqueue(&mut self, request: TxRequest) -> Result<(), CccdError> {
        if self.is_full() {
            return Err(CccdError::QueueFull);
        }
        self.queue.push_back(request);
        Ok(())
    }

    /// Queue a write enabling (or disabling) notifications on a peer CCCD and
    /// try to send it right away.
    pub fn configure<S: SoftDevice + ?Sized>(
        &mut self,
        stack: &mut S,
        conn_handle: u16,
        cccd_handle: u16,
        enable: bool,
    ) -> Result<(), CccdError> {
        debug!(
            "Configuring CCCD. CCCD handle = {}, connection handle = {}",
            cccd_handle, conn_handle
        );
        self.enqueue(TxRequest::Write {
            conn_handle,
            params: GattcWriteParams {
                handle: cccd_handle,
                offset: 0,
                write_op: WriteOp::WriteReq,
                value: cccd_value(enable).to_vec(),
            },
        })?;
        self.process(stack);
        Ok(())
    }

    /// Queue a read of a peer attribute
    pub fn queue_read<S: SoftDevice + ?Sized>(
        &mut self,
        stack: &mut S,
        conn_handle: u16,
        handle: u16,
    ) -> Result<(), CccdError> {
        self.enqueue(TxRequest::Read {
            conn_handle,
            handle,
        })?;
        self.process(stack);
        Ok(())
    }

    /// Hand the head request to the stack. Returns true if one was accepted.
    pub fn process<S: SoftDevice + ?Sized>(&mut self, stack: &mut S) -> bool {
        let Some(request) = self.queue.front() else {
            return false;
        };

        let result = match request {
            TxRequest::Read {
                conn_handle,
                handle,
            } => stack.gattc_read(*conn_handle, *handle, 0),
            TxRequest::Write {
                conn_handle,
                params,
            } => stack.gattc_write(*conn_handle, params),
        };

        match result {
            Ok(()) => {
                debug!("GATTC read/write accepted");
                self.queue.pop_front();
                true
            }
            Err(e) => {
                debug!("GATTC read/write returned {}; will retry", e);
                false
            }
        }
    }

    /// Drop requests for a link that went away
    pub fn purge(&mut self, conn_handle: u16) {
        self.queue.retain(|request| match request {
            TxRequest::Read { conn_handle: c, .. } | TxRequest::Write { conn_handle: c, .. } => {
                *c != conn_handle
            }
        });
    }
}

impl Default for CccdTxQueue {
    fn default() -> Self {
        Self::new(TX_BUFFER_SIZE)
    }
}
