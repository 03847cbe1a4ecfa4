//! Binding protocol between the harness and an optimized convolution implementation.
//!
//! The implementation under test owns its tensors in whatever packed layout it
//! prefers. The harness only ever talks to it through this protocol:
//!
//! 1. `create` a handle from a [`ConvolutionDescriptor`] and a thread count;
//! 2. `link_tensor` per role, `copy_in` canonical NCHW/KCRS data, `bind` it;
//! 3. query `required_scratch`, allocate, `bind_scratch`;
//! 4. `execute` once per thread index (see [`execute_collective`]);
//! 5. `copy_out` results, `release` tensors and scratch, `destroy` the handle.

mod blocked_direct;

use std::thread;

use log::debug;

use crate::convolution_descriptor::ConvolutionDescriptor;
use crate::errors::{BackendError, BackendResult, ConvolutionResult};
use crate::tensor::allocate;

pub use blocked_direct::{BlockedDirectBackend, BlockedDirectHandle, BlockedTensor};

/// The part a tensor plays in a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorRole {
    Input,
    Output,
    Filter,
    InputGrad,
    OutputGrad,
    FilterGrad,
}

impl TensorRole {
    /// Canonical layout of the caller-side buffer for this role.
    pub fn external_layout(self) -> ExternalLayout {
        match self {
            TensorRole::Filter | TensorRole::FilterGrad => ExternalLayout::Kcrs,
            _ => ExternalLayout::Nchw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeKind {
    Forward,
    BackwardData,
    BackwardFilter,
}

/// Canonical layouts a backend converts its packed tensors from and to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalLayout {
    /// Activations, including any storage border of the descriptor.
    Nchw,
    /// Filters.
    Kcrs,
}

/// Caller-owned source buffer of a `copy_in`.
#[derive(Debug, Clone, Copy)]
pub enum ExternalBuffer<'a> {
    I16(&'a [i16]),
    I32(&'a [i32]),
}

impl ExternalBuffer<'_> {
    pub fn len(&self) -> usize {
        match self {
            ExternalBuffer::I16(data) => data.len(),
            ExternalBuffer::I32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ExternalBuffer::I16(_) => "i16",
            ExternalBuffer::I32(_) => "i32",
        }
    }
}

/// Caller-owned destination buffer of a `copy_out`.
#[derive(Debug)]
pub enum ExternalBufferMut<'a> {
    I16(&'a mut [i16]),
    I32(&'a mut [i32]),
}

impl ExternalBufferMut<'_> {
    pub fn len(&self) -> usize {
        match self {
            ExternalBufferMut::I16(data) => data.len(),
            ExternalBufferMut::I32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ExternalBufferMut::I16(_) => "i16",
            ExternalBufferMut::I32(_) => "i32",
        }
    }
}

/// Caller-allocated scratch memory handed to a backend for one compute kind.
///
/// Stored as 32-bit words so backends can stage accumulators in it without
/// realigning; the byte view is what the protocol sizes and what the caller may
/// initialize.
#[derive(Debug, Clone, PartialEq)]
pub struct ScratchBuffer {
    words: Vec<i32>,
}

impl ScratchBuffer {
    /// Allocates at least `bytes` bytes of zeroed scratch.
    pub fn allocate(bytes: usize) -> ConvolutionResult<Self> {
        let words = allocate(bytes.div_ceil(std::mem::size_of::<i32>()), 0i32)?;
        Ok(Self { words })
    }

    pub fn from_words(words: Vec<i32>) -> Self {
        Self { words }
    }

    pub fn len_bytes(&self) -> usize {
        self.words.len() * std::mem::size_of::<i32>()
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words)
    }

    /// Overwrites every byte, so a backend relying on zeroed scratch is caught.
    pub fn poison(&mut self, byte: u8) {
        self.as_bytes_mut().fill(byte);
    }

    pub fn into_words(self) -> Vec<i32> {
        self.words
    }
}

/// A tensor in a backend's internal layout.
pub trait LinkedTensor: Send + Sync {
    fn role(&self) -> TensorRole;

    /// Converts a canonical buffer into the internal layout.
    fn copy_in(&mut self, source: ExternalBuffer<'_>, layout: ExternalLayout) -> BackendResult<()>;

    /// Converts the internal layout back into a canonical buffer.
    ///
    /// Elements of `destination` outside the tensor's active window are zeroed.
    fn copy_out(&self, destination: ExternalBufferMut<'_>, layout: ExternalLayout) -> BackendResult<()>;

    fn zero(&mut self) -> BackendResult<()>;
}

/// A configured layer inside a backend.
///
/// `execute` takes `&self`: it is a collective call issued concurrently by every
/// thread index in `0..threads()`, and the pass is complete only once all of
/// them have returned.
pub trait ConvolutionHandle: Sync {
    type Tensor: LinkedTensor;

    fn threads(&self) -> usize;

    /// Creates an unbound tensor for `role` in the backend's internal layout.
    fn link_tensor(&self, role: TensorRole) -> BackendResult<Self::Tensor>;

    fn bind(&mut self, role: TensorRole, tensor: Self::Tensor) -> BackendResult<()>;

    fn release(&mut self, role: TensorRole) -> BackendResult<Self::Tensor>;

    fn tensor(&self, role: TensorRole) -> BackendResult<&Self::Tensor>;

    fn tensor_mut(&mut self, role: TensorRole) -> BackendResult<&mut Self::Tensor>;

    /// Scratch bytes the caller must bind before executing `kind`.
    fn required_scratch(&self, kind: ComputeKind) -> BackendResult<usize>;

    fn bind_scratch(&mut self, kind: ComputeKind, scratch: ScratchBuffer) -> BackendResult<()>;

    fn release_scratch(&mut self, kind: ComputeKind) -> BackendResult<ScratchBuffer>;

    /// Runs the share of `kind` that belongs to `thread_index`.
    fn execute(&self, kind: ComputeKind, thread_index: usize) -> BackendResult<()>;

    /// Releases handle-owned resources. Tensors and scratch still bound are dropped.
    fn destroy(self);
}

/// Backend factory.
pub trait ConvolutionBackend {
    type Handle: ConvolutionHandle;

    fn name(&self) -> &str;

    fn create(&self, descriptor: &ConvolutionDescriptor, threads: usize) -> BackendResult<Self::Handle>;
}

/// Issues `execute(kind, thread_index)` for every thread index on its own scoped
/// thread and waits for all of them; the join is the barrier before results are read.
pub fn execute_collective<H: ConvolutionHandle>(handle: &H, kind: ComputeKind) -> BackendResult<()> {
    let threads = handle.threads();
    if threads == 0 {
        return Err(BackendError::InvalidThreadCount { count: 0 });
    }
    if threads == 1 {
        return handle.execute(kind, 0);
    }

    debug!("executing {:?} on {} threads", kind, threads);

    thread::scope(|scope| {
        let workers: Vec<_> = (0..threads)
            .map(|thread_index| scope.spawn(move || handle.execute(kind, thread_index)))
            .collect();

        let mut result = Ok(());
        for worker in workers {
            let outcome = match worker.join() {
                Ok(outcome) => outcome,
                Err(_) => Err(BackendError::WorkerPanicked),
            };
            if result.is_ok() {
                result = outcome;
            }
        }
        result
    })
}
