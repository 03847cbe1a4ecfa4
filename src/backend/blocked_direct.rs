//! Channel-blocked direct convolution used as the built-in implementation under test.
//!
//! Activations are packed as `[n][channel block][h][w][lane]` and filters as
//! `[k block][c block][r][s][c lane][k lane]`, with channel counts rounded up to
//! whole blocks (the extra lanes hold zeros). The input carries an internal zero
//! border as wide as the compute pad, so the hot loops never test bounds.
//!
//! Unlike the reference engine, every pass overwrites its destination.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use log::{debug, info};

use super::{
    ComputeKind, ConvolutionBackend, ConvolutionHandle, ExternalBuffer, ExternalBufferMut, ExternalLayout,
    LinkedTensor, ScratchBuffer, TensorRole,
};
use crate::convolution_descriptor::ConvolutionDescriptor;
use crate::convolution_info::FusedOps;
use crate::errors::{BackendError, BackendResult, ConvolutionError};
use crate::parallel_for::partition_range;
use crate::tensor::{allocate, checked_len, padded_size, size_overflow};

pub const DEFAULT_CHANNEL_BLOCK: usize = 8;

/// Factory for [`BlockedDirectHandle`]s.
#[derive(Debug, Clone, Copy)]
pub struct BlockedDirectBackend {
    channel_block: usize,
}

impl Default for BlockedDirectBackend {
    fn default() -> Self {
        Self {
            channel_block: DEFAULT_CHANNEL_BLOCK,
        }
    }
}

impl BlockedDirectBackend {
    pub fn new(channel_block: usize) -> Self {
        Self { channel_block }
    }

    pub fn channel_block(&self) -> usize {
        self.channel_block
    }
}

impl ConvolutionBackend for BlockedDirectBackend {
    type Handle = BlockedDirectHandle;

    fn name(&self) -> &str {
        "blocked-direct"
    }

    fn create(&self, descriptor: &ConvolutionDescriptor, threads: usize) -> BackendResult<BlockedDirectHandle> {
        if threads == 0 {
            return Err(BackendError::InvalidThreadCount { count: threads });
        }
        if self.channel_block == 0 {
            return Err(BackendError::UnsupportedConfiguration {
                message: "channel block must be at least 1".to_string(),
            });
        }
        if descriptor.fused_ops() != FusedOps::None {
            return Err(ConvolutionError::UnsupportedFusedOps {
                fused_ops: descriptor.fused_ops().to_string(),
                input: descriptor.datatype_in().to_string(),
                output: descriptor.datatype_out().to_string(),
            }
            .into());
        }

        let geometry = Geometry::new(descriptor, self.channel_block);
        let footprint = geometry
            .checked_footprint(threads)
            .ok_or_else(|| BackendError::from(size_overflow(std::mem::size_of::<i32>())))?;
        debug!("largest buffer size {}", footprint);
        info!(
            "created {} handle: block {}, {}x{} channel blocks, {} threads",
            self.name(),
            geometry.block,
            geometry.input_blocks,
            geometry.output_blocks,
            threads
        );

        Ok(BlockedDirectHandle {
            geometry,
            threads,
            tensors: HashMap::new(),
            scratch: HashMap::new(),
        })
    }
}

/// Sizes shared by every tensor of one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Geometry {
    batch: usize,
    input_channels: usize,
    output_channels: usize,
    block: usize,
    input_blocks: usize,
    output_blocks: usize,
    ifh: usize,
    ifw: usize,
    ofh: usize,
    ofw: usize,
    kh: usize,
    kw: usize,
    stride_h: usize,
    stride_w: usize,
    pad_h: usize,
    pad_w: usize,
    pad_h_in: usize,
    pad_w_in: usize,
    pad_h_out: usize,
    pad_w_out: usize,
}

impl Geometry {
    fn new(descriptor: &ConvolutionDescriptor, block: usize) -> Self {
        let layout = descriptor.layout();
        Self {
            batch: descriptor.batch(),
            input_channels: descriptor.input_channels(),
            output_channels: descriptor.output_channels(),
            block,
            input_blocks: descriptor.input_channels().div_ceil(block),
            output_blocks: descriptor.output_channels().div_ceil(block),
            ifh: descriptor.input_height(),
            ifw: descriptor.input_width(),
            ofh: layout.ofh,
            ofw: layout.ofw,
            kh: descriptor.kernel_height(),
            kw: descriptor.kernel_width(),
            stride_h: descriptor.stride_h(),
            stride_w: descriptor.stride_w(),
            pad_h: layout.pad_h,
            pad_w: layout.pad_w,
            pad_h_in: layout.pad_h_in,
            pad_w_in: layout.pad_w_in,
            pad_h_out: layout.pad_h_out,
            pad_w_out: layout.pad_w_out,
        }
    }

    /// Size of the largest buffer the handle may need, or `None` when a size
    /// does not fit in `usize`. Once this succeeds, the unchecked
    /// size arithmetic of the handle cannot overflow.
    fn checked_footprint(&self, threads: usize) -> Option<usize> {
        let (height, width) = (
            padded_size(self.ifh, self.pad_h)?,
            padded_size(self.ifw, self.pad_w)?,
        );
        let staging = checked_len(&[threads, height, width, self.block, std::mem::size_of::<i32>()])?;

        let mut largest = staging;
        for role in [TensorRole::Input, TensorRole::Output, TensorRole::InputGrad] {
            let shape = self.activation_shape(role)?;
            let packed = checked_len(&[
                shape.planes(),
                padded_size(shape.height, shape.border_h)?,
                padded_size(shape.width, shape.border_w)?,
                shape.block,
            ])?;
            let external = checked_len(&[
                shape.batch,
                shape.channels,
                padded_size(shape.height, shape.ext_pad_h)?,
                padded_size(shape.width, shape.ext_pad_w)?,
            ])?;
            largest = largest.max(packed).max(external);
        }
        let filter = checked_len(&[self.output_blocks, self.input_blocks, self.kh, self.kw, self.block, self.block])?;
        Some(largest.max(filter))
    }

    /// Height and width of the bordered input plane.
    fn bordered_input(&self) -> (usize, usize) {
        (self.ifh + 2 * self.pad_h, self.ifw + 2 * self.pad_w)
    }

    fn activation_shape(&self, role: TensorRole) -> Option<ActivationShape> {
        let (channels, blocks, height, width, border_h, border_w, ext_pad_h, ext_pad_w) = match role {
            TensorRole::Input => (
                self.input_channels,
                self.input_blocks,
                self.ifh,
                self.ifw,
                self.pad_h,
                self.pad_w,
                self.pad_h_in,
                self.pad_w_in,
            ),
            TensorRole::InputGrad => (
                self.input_channels,
                self.input_blocks,
                self.ifh,
                self.ifw,
                0,
                0,
                self.pad_h_in,
                self.pad_w_in,
            ),
            TensorRole::Output | TensorRole::OutputGrad => (
                self.output_channels,
                self.output_blocks,
                self.ofh,
                self.ofw,
                0,
                0,
                self.pad_h_out,
                self.pad_w_out,
            ),
            TensorRole::Filter | TensorRole::FilterGrad => return None,
        };
        Some(ActivationShape {
            batch: self.batch,
            channels,
            blocks,
            block: self.block,
            height,
            width,
            border_h,
            border_w,
            ext_pad_h,
            ext_pad_w,
        })
    }

    fn filter_shape(&self) -> FilterShape {
        FilterShape {
            output_channels: self.output_channels,
            input_channels: self.input_channels,
            output_blocks: self.output_blocks,
            input_blocks: self.input_blocks,
            block: self.block,
            kh: self.kh,
            kw: self.kw,
        }
    }
}

/// Packed NCHWc activation plus the canonical NCHW buffer it converts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActivationShape {
    batch: usize,
    channels: usize,
    blocks: usize,
    block: usize,
    height: usize,
    width: usize,
    /// Internal zero border of each packed plane.
    border_h: usize,
    border_w: usize,
    /// Storage border of the canonical buffer.
    ext_pad_h: usize,
    ext_pad_w: usize,
}

impl ActivationShape {
    fn planes(&self) -> usize {
        self.batch * self.blocks
    }

    fn plane_width(&self) -> usize {
        self.width + 2 * self.border_w
    }

    fn plane_len(&self) -> usize {
        (self.height + 2 * self.border_h) * self.plane_width() * self.block
    }

    #[inline]
    fn packed_offset(&self, y: usize, x: usize) -> usize {
        ((y + self.border_h) * self.plane_width() + x + self.border_w) * self.block
    }

    fn external_len(&self) -> usize {
        self.batch * self.channels * (self.height + 2 * self.ext_pad_h) * (self.width + 2 * self.ext_pad_w)
    }

    #[inline]
    fn external_index(&self, n: usize, c: usize, y: usize, x: usize) -> usize {
        let height = self.height + 2 * self.ext_pad_h;
        let width = self.width + 2 * self.ext_pad_w;
        ((n * self.channels + c) * height + y + self.ext_pad_h) * width + x + self.ext_pad_w
    }

    fn pack<T: Copy>(&self, plane_index: usize, source: &[T], plane: &mut [T]) {
        let (n, channel_block) = (plane_index / self.blocks, plane_index % self.blocks);
        for lane in 0..self.block {
            let c = channel_block * self.block + lane;
            if c >= self.channels {
                break;
            }
            for y in 0..self.height {
                for x in 0..self.width {
                    plane[self.packed_offset(y, x) + lane] = source[self.external_index(n, c, y, x)];
                }
            }
        }
    }

    fn unpack<T: Copy>(&self, plane_index: usize, plane: &[T], destination: &mut [T]) {
        let (n, channel_block) = (plane_index / self.blocks, plane_index % self.blocks);
        for lane in 0..self.block {
            let c = channel_block * self.block + lane;
            if c >= self.channels {
                break;
            }
            for y in 0..self.height {
                for x in 0..self.width {
                    destination[self.external_index(n, c, y, x)] = plane[self.packed_offset(y, x) + lane];
                }
            }
        }
    }
}

/// Packed KCRSck filter; one plane per `(k block, c block)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FilterShape {
    output_channels: usize,
    input_channels: usize,
    output_blocks: usize,
    input_blocks: usize,
    block: usize,
    kh: usize,
    kw: usize,
}

impl FilterShape {
    fn planes(&self) -> usize {
        self.output_blocks * self.input_blocks
    }

    fn plane_len(&self) -> usize {
        self.kh * self.kw * self.block * self.block
    }

    fn external_len(&self) -> usize {
        self.output_channels * self.input_channels * self.kh * self.kw
    }

    #[inline]
    fn packed_offset(&self, r: usize, s: usize, c_lane: usize, k_lane: usize) -> usize {
        ((r * self.kw + s) * self.block + c_lane) * self.block + k_lane
    }

    fn for_each_element(&self, mut visit: impl FnMut(usize, usize, usize)) {
        for k in 0..self.output_channels {
            for c in 0..self.input_channels {
                let plane = (k / self.block) * self.input_blocks + c / self.block;
                for r in 0..self.kh {
                    for s in 0..self.kw {
                        let external = ((k * self.input_channels + c) * self.kh + r) * self.kw + s;
                        let packed = self.packed_offset(r, s, c % self.block, k % self.block);
                        visit(plane, packed, external);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackedShape {
    Activation(ActivationShape),
    Filter(FilterShape),
}

impl PackedShape {
    fn planes(&self) -> usize {
        match self {
            PackedShape::Activation(shape) => shape.planes(),
            PackedShape::Filter(shape) => shape.planes(),
        }
    }

    fn plane_len(&self) -> usize {
        match self {
            PackedShape::Activation(shape) => shape.plane_len(),
            PackedShape::Filter(shape) => shape.plane_len(),
        }
    }

    fn external_len(&self) -> usize {
        match self {
            PackedShape::Activation(shape) => shape.external_len(),
            PackedShape::Filter(shape) => shape.external_len(),
        }
    }

    fn layout(&self) -> ExternalLayout {
        match self {
            PackedShape::Activation(_) => ExternalLayout::Nchw,
            PackedShape::Filter(_) => ExternalLayout::Kcrs,
        }
    }
}

/// Plane storage: operands are read-only during a pass, accumulators are
/// written by exactly one thread per plane.
///
/// `execute` takes `&self` and is called from every worker at once, so
/// accumulator planes need interior mutability. `partition_range` hands each
/// thread a disjoint run of plane indices and a plane is only locked by the
/// thread that owns it. The lock is therefore never contended; poisoning is
/// how a panicked worker shows up in later passes.
#[derive(Debug)]
enum Storage {
    Operand(Vec<Vec<i16>>),
    Accumulator(Vec<Mutex<Vec<i32>>>),
}

fn data_type_mismatch(role: TensorRole, expected: &str, actual: &str) -> BackendError {
    BackendError::DataTypeMismatch {
        role,
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

fn lock<T>(plane: &Mutex<T>) -> BackendResult<MutexGuard<'_, T>> {
    plane.lock().map_err(|_| BackendError::WorkerPanicked)
}

/// A tensor in the blocked layout.
#[derive(Debug)]
pub struct BlockedTensor {
    role: TensorRole,
    shape: PackedShape,
    storage: Storage,
}

impl BlockedTensor {
    fn new(role: TensorRole, geometry: &Geometry) -> BackendResult<Self> {
        let shape = match role {
            TensorRole::Filter => PackedShape::Filter(geometry.filter_shape()),
            TensorRole::FilterGrad => {
                return Err(BackendError::UnsupportedComputeKind {
                    kind: ComputeKind::BackwardFilter,
                });
            }
            _ => match geometry.activation_shape(role) {
                Some(shape) => PackedShape::Activation(shape),
                None => {
                    return Err(BackendError::UnsupportedConfiguration {
                        message: format!("no activation shape for {:?}", role),
                    });
                }
            },
        };

        let storage = match role {
            TensorRole::Output | TensorRole::InputGrad => {
                let mut planes = Vec::with_capacity(shape.planes());
                for _ in 0..shape.planes() {
                    planes.push(Mutex::new(allocate(shape.plane_len(), 0i32)?));
                }
                Storage::Accumulator(planes)
            }
            _ => {
                let mut planes = Vec::with_capacity(shape.planes());
                for _ in 0..shape.planes() {
                    planes.push(allocate(shape.plane_len(), 0i16)?);
                }
                Storage::Operand(planes)
            }
        };

        Ok(Self { role, shape, storage })
    }

    fn check_external(&self, layout: ExternalLayout, len: usize) -> BackendResult<()> {
        if layout != self.shape.layout() {
            return Err(BackendError::LayoutMismatch {
                role: self.role,
                layout,
            });
        }
        if len != self.shape.external_len() {
            return Err(BackendError::BufferSizeMismatch {
                role: self.role,
                expected: self.shape.external_len(),
                actual: len,
            });
        }
        Ok(())
    }

    fn element_type(&self) -> &'static str {
        match self.storage {
            Storage::Operand(_) => "i16",
            Storage::Accumulator(_) => "i32",
        }
    }

    fn type_mismatch(&self, actual: &str) -> BackendError {
        data_type_mismatch(self.role, self.element_type(), actual)
    }

    fn operand_planes(&self) -> BackendResult<&[Vec<i16>]> {
        match &self.storage {
            Storage::Operand(planes) => Ok(planes),
            Storage::Accumulator(_) => Err(self.type_mismatch("i16")),
        }
    }

    fn accumulator_planes(&self) -> BackendResult<&[Mutex<Vec<i32>>]> {
        match &self.storage {
            Storage::Accumulator(planes) => Ok(planes),
            Storage::Operand(_) => Err(self.type_mismatch("i32")),
        }
    }
}

impl LinkedTensor for BlockedTensor {
    fn role(&self) -> TensorRole {
        self.role
    }

    fn copy_in(&mut self, source: ExternalBuffer<'_>, layout: ExternalLayout) -> BackendResult<()> {
        self.check_external(layout, source.len())?;
        let (role, shape, expected) = (self.role, self.shape, self.element_type());
        match (&mut self.storage, source) {
            (Storage::Operand(planes), ExternalBuffer::I16(source)) => match shape {
                PackedShape::Activation(shape) => {
                    for (index, plane) in planes.iter_mut().enumerate() {
                        shape.pack(index, source, plane);
                    }
                }
                PackedShape::Filter(shape) => {
                    shape.for_each_element(|plane, packed, external| planes[plane][packed] = source[external]);
                }
            },
            (Storage::Accumulator(planes), ExternalBuffer::I32(source)) => match shape {
                PackedShape::Activation(shape) => {
                    for (index, plane) in planes.iter().enumerate() {
                        shape.pack(index, source, &mut lock(plane)?[..]);
                    }
                }
                PackedShape::Filter(_) => return Err(data_type_mismatch(role, expected, "i32")),
            },
            (_, source) => return Err(data_type_mismatch(role, expected, source.type_name())),
        }
        Ok(())
    }

    fn copy_out(&self, destination: ExternalBufferMut<'_>, layout: ExternalLayout) -> BackendResult<()> {
        self.check_external(layout, destination.len())?;
        match (&self.storage, destination) {
            (Storage::Operand(planes), ExternalBufferMut::I16(destination)) => {
                destination.fill(0);
                match self.shape {
                    PackedShape::Activation(shape) => {
                        for (index, plane) in planes.iter().enumerate() {
                            shape.unpack(index, plane, destination);
                        }
                    }
                    PackedShape::Filter(shape) => {
                        shape.for_each_element(|plane, packed, external| {
                            destination[external] = planes[plane][packed]
                        });
                    }
                }
            }
            (Storage::Accumulator(planes), ExternalBufferMut::I32(destination)) => {
                destination.fill(0);
                if let PackedShape::Activation(shape) = self.shape {
                    for (index, plane) in planes.iter().enumerate() {
                        shape.unpack(index, &lock(plane)?[..], destination);
                    }
                }
            }
            (_, destination) => return Err(self.type_mismatch(destination.type_name())),
        }
        Ok(())
    }

    fn zero(&mut self) -> BackendResult<()> {
        match &mut self.storage {
            Storage::Operand(planes) => planes.iter_mut().for_each(|plane| plane.fill(0)),
            Storage::Accumulator(planes) => {
                for plane in planes.iter() {
                    lock(plane)?.fill(0);
                }
            }
        }
        Ok(())
    }
}

/// Bound scratch, split into one staging plane per thread. Thread `t` only
/// locks `staging[t]`.
#[derive(Debug)]
struct BoundScratch {
    staging: Vec<Mutex<Vec<i32>>>,
    remainder: Vec<i32>,
}

impl BoundScratch {
    fn split(scratch: ScratchBuffer, threads: usize, words_per_thread: usize) -> Self {
        let mut words = scratch.into_words();
        let remainder = words.split_off((threads * words_per_thread).min(words.len()));
        let staging = if words_per_thread == 0 {
            Vec::new()
        } else {
            words
                .chunks(words_per_thread)
                .map(|chunk| Mutex::new(chunk.to_vec()))
                .collect()
        };
        Self { staging, remainder }
    }

    fn into_scratch(self) -> BackendResult<ScratchBuffer> {
        let mut words = Vec::new();
        for plane in self.staging {
            words.extend(plane.into_inner().map_err(|_| BackendError::WorkerPanicked)?);
        }
        words.extend(self.remainder);
        Ok(ScratchBuffer::from_words(words))
    }
}

/// A layer configured on the blocked direct backend.
#[derive(Debug)]
pub struct BlockedDirectHandle {
    geometry: Geometry,
    threads: usize,
    tensors: HashMap<TensorRole, BlockedTensor>,
    scratch: HashMap<ComputeKind, BoundScratch>,
}

impl BlockedDirectHandle {
    fn staging_words(&self) -> usize {
        let (height, width) = self.geometry.bordered_input();
        height * width * self.geometry.block
    }

    fn forward(&self, thread_index: usize) -> BackendResult<()> {
        let g = &self.geometry;
        let input = self.tensor(TensorRole::Input)?.operand_planes()?;
        let filter = self.tensor(TensorRole::Filter)?.operand_planes()?;
        let output = self.tensor(TensorRole::Output)?.accumulator_planes()?;

        let blk = g.block;
        let (_, input_width) = g.bordered_input();

        for unit in partition_range(output.len(), self.threads, thread_index) {
            let (n, ofm_block) = (unit / g.output_blocks, unit % g.output_blocks);
            let mut out = lock(&output[unit])?;
            out.fill(0);

            for ifm_block in 0..g.input_blocks {
                let input_plane = &input[n * g.input_blocks + ifm_block];
                let filter_plane = &filter[ofm_block * g.input_blocks + ifm_block];

                for oj in 0..g.ofh {
                    for oi in 0..g.ofw {
                        let out_offset = (oj * g.ofw + oi) * blk;
                        for r in 0..g.kh {
                            for s in 0..g.kw {
                                let in_offset = ((oj * g.stride_h + r) * input_width + oi * g.stride_w + s) * blk;
                                let filter_offset = (r * g.kw + s) * blk * blk;
                                for c in 0..blk {
                                    let a = input_plane[in_offset + c] as i32;
                                    let weights = &filter_plane[filter_offset + c * blk..filter_offset + (c + 1) * blk];
                                    for (acc, &w) in out[out_offset..out_offset + blk].iter_mut().zip(weights) {
                                        *acc = acc.wrapping_add(a * w as i32);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn backward_data(&self, thread_index: usize) -> BackendResult<()> {
        let g = &self.geometry;
        let output_grad = self.tensor(TensorRole::OutputGrad)?.operand_planes()?;
        let filter = self.tensor(TensorRole::Filter)?.operand_planes()?;
        let input_grad = self.tensor(TensorRole::InputGrad)?.accumulator_planes()?;
        let scratch = self
            .scratch
            .get(&ComputeKind::BackwardData)
            .ok_or(BackendError::ScratchNotBound {
                kind: ComputeKind::BackwardData,
            })?;
        let staging = scratch
            .staging
            .get(thread_index)
            .ok_or(BackendError::ScratchNotBound {
                kind: ComputeKind::BackwardData,
            })?;
        let mut staging = lock(staging)?;

        let blk = g.block;
        let (_, staging_width) = g.bordered_input();

        for unit in partition_range(input_grad.len(), self.threads, thread_index) {
            let (n, ifm_block) = (unit / g.input_blocks, unit % g.input_blocks);
            staging.fill(0);

            for ofm_block in 0..g.output_blocks {
                let grad_plane = &output_grad[n * g.output_blocks + ofm_block];
                let filter_plane = &filter[ofm_block * g.input_blocks + ifm_block];

                for oj in 0..g.ofh {
                    for oi in 0..g.ofw {
                        let grads = &grad_plane[(oj * g.ofw + oi) * blk..(oj * g.ofw + oi + 1) * blk];
                        for r in 0..g.kh {
                            for s in 0..g.kw {
                                let stage_offset =
                                    ((oj * g.stride_h + r) * staging_width + oi * g.stride_w + s) * blk;
                                let filter_offset = (r * g.kw + s) * blk * blk;
                                for c in 0..blk {
                                    let weights =
                                        &filter_plane[filter_offset + c * blk..filter_offset + (c + 1) * blk];
                                    let sum = grads
                                        .iter()
                                        .zip(weights)
                                        .fold(0i32, |acc, (&dy, &w)| acc.wrapping_add(dy as i32 * w as i32));
                                    let cell = &mut staging[stage_offset + c];
                                    *cell = cell.wrapping_add(sum);
                                }
                            }
                        }
                    }
                }
            }

            // Crop the compute border away.
            let mut target = lock(&input_grad[unit])?;
            for y in 0..g.ifh {
                let from = ((y + g.pad_h) * staging_width + g.pad_w) * blk;
                let to = y * g.ifw * blk;
                target[to..to + g.ifw * blk].copy_from_slice(&staging[from..from + g.ifw * blk]);
            }
        }
        Ok(())
    }
}

impl ConvolutionHandle for BlockedDirectHandle {
    type Tensor = BlockedTensor;

    fn threads(&self) -> usize {
        self.threads
    }

    fn link_tensor(&self, role: TensorRole) -> BackendResult<BlockedTensor> {
        BlockedTensor::new(role, &self.geometry)
    }

    fn bind(&mut self, role: TensorRole, tensor: BlockedTensor) -> BackendResult<()> {
        if tensor.role != role {
            return Err(BackendError::RoleMismatch {
                expected: tensor.role,
                actual: role,
            });
        }
        if self.tensors.contains_key(&role) {
            return Err(BackendError::TensorAlreadyBound { role });
        }
        self.tensors.insert(role, tensor);
        Ok(())
    }

    fn release(&mut self, role: TensorRole) -> BackendResult<BlockedTensor> {
        self.tensors.remove(&role).ok_or(BackendError::TensorNotBound { role })
    }

    fn tensor(&self, role: TensorRole) -> BackendResult<&BlockedTensor> {
        self.tensors.get(&role).ok_or(BackendError::TensorNotBound { role })
    }

    fn tensor_mut(&mut self, role: TensorRole) -> BackendResult<&mut BlockedTensor> {
        self.tensors.get_mut(&role).ok_or(BackendError::TensorNotBound { role })
    }

    fn required_scratch(&self, kind: ComputeKind) -> BackendResult<usize> {
        match kind {
            ComputeKind::Forward => Ok(0),
            ComputeKind::BackwardData => Ok(self.threads * self.staging_words() * std::mem::size_of::<i32>()),
            ComputeKind::BackwardFilter => Err(BackendError::UnsupportedComputeKind { kind }),
        }
    }

    fn bind_scratch(&mut self, kind: ComputeKind, scratch: ScratchBuffer) -> BackendResult<()> {
        let required = self.required_scratch(kind)?;
        if scratch.len_bytes() < required {
            return Err(BackendError::ScratchTooSmall {
                kind,
                required,
                provided: scratch.len_bytes(),
            });
        }
        let words_per_thread = match kind {
            ComputeKind::BackwardData => self.staging_words(),
            _ => 0,
        };
        debug!("bound {} scratch bytes for {:?}", scratch.len_bytes(), kind);
        self.scratch
            .insert(kind, BoundScratch::split(scratch, self.threads, words_per_thread));
        Ok(())
    }

    fn release_scratch(&mut self, kind: ComputeKind) -> BackendResult<ScratchBuffer> {
        self.scratch
            .remove(&kind)
            .ok_or(BackendError::ScratchNotBound { kind })?
            .into_scratch()
    }

    fn execute(&self, kind: ComputeKind, thread_index: usize) -> BackendResult<()> {
        if thread_index >= self.threads {
            return Err(BackendError::ThreadIndexOutOfRange {
                index: thread_index,
                threads: self.threads,
            });
        }
        match kind {
            ComputeKind::Forward => self.forward(thread_index),
            ComputeKind::BackwardData => self.backward_data(thread_index),
            ComputeKind::BackwardFilter => Err(BackendError::UnsupportedComputeKind { kind }),
        }
    }

    fn destroy(self) {
        debug!(
            "destroying blocked-direct handle with {} tensors and {} scratch buffers still bound",
            self.tensors.len(),
            self.scratch.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convolution_info::ConvolutionInfo;

    fn descriptor() -> ConvolutionDescriptor {
        ConvolutionDescriptor::new(ConvolutionInfo {
            batch: 1,
            input_channels: 3,
            output_channels: 5,
            input_height: 4,
            input_width: 4,
            kernel_height: 3,
            kernel_width: 3,
            stride_h: 1,
            stride_w: 1,
            pad_h: 1,
            pad_w: 1,
            ..ConvolutionInfo::default()
        })
        .unwrap()
    }

    #[test]
    fn test_filter_copy_round_trip_with_partial_blocks() {
        let handle = BlockedDirectBackend::new(4).create(&descriptor(), 1).unwrap();
        let mut filter = handle.link_tensor(TensorRole::Filter).unwrap();
        let source: Vec<i16> = (0..5 * 3 * 9).map(|v| v as i16).collect();
        filter.copy_in(ExternalBuffer::I16(&source), ExternalLayout::Kcrs).unwrap();

        let mut back = vec![0i16; source.len()];
        filter
            .copy_out(ExternalBufferMut::I16(&mut back), ExternalLayout::Kcrs)
            .unwrap();
        assert_eq!(back, source);
    }

    #[test]
    fn test_copy_in_checks_layout_and_type() {
        let handle = BlockedDirectBackend::default().create(&descriptor(), 1).unwrap();
        let mut input = handle.link_tensor(TensorRole::Input).unwrap();
        let wrong_len = vec![0i16; 3];
        assert!(matches!(
            input.copy_in(ExternalBuffer::I16(&wrong_len), ExternalLayout::Nchw),
            Err(BackendError::BufferSizeMismatch { .. })
        ));
        let source = vec![0i16; 3 * 16];
        assert!(matches!(
            input.copy_in(ExternalBuffer::I16(&source), ExternalLayout::Kcrs),
            Err(BackendError::LayoutMismatch { .. })
        ));
        let wide = vec![0i32; 3 * 16];
        assert!(matches!(
            input.copy_in(ExternalBuffer::I32(&wide), ExternalLayout::Nchw),
            Err(BackendError::DataTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_scratch_requirements() {
        let handle = BlockedDirectBackend::new(2).create(&descriptor(), 3).unwrap();
        assert_eq!(handle.required_scratch(ComputeKind::Forward).unwrap(), 0);
        assert_eq!(
            handle.required_scratch(ComputeKind::BackwardData).unwrap(),
            3 * 6 * 6 * 2 * 4
        );
        assert!(matches!(
            handle.required_scratch(ComputeKind::BackwardFilter),
            Err(BackendError::UnsupportedComputeKind { .. })
        ));
    }

    #[test]
    fn test_scratch_round_trip_keeps_size() {
        let mut handle = BlockedDirectBackend::new(2).create(&descriptor(), 2).unwrap();
        let required = handle.required_scratch(ComputeKind::BackwardData).unwrap();
        let scratch = ScratchBuffer::allocate(required + 8).unwrap();
        handle.bind_scratch(ComputeKind::BackwardData, scratch).unwrap();
        let released = handle.release_scratch(ComputeKind::BackwardData).unwrap();
        assert_eq!(released.len_bytes(), required + 8);
    }

    #[test]
    fn test_rejects_unrepresentable_sizes() {
        let info = ConvolutionInfo {
            stride_h: usize::MAX / 4,
            pad_h: usize::MAX / 4,
            ..descriptor().info().clone()
        };
        let descriptor = ConvolutionDescriptor::new(info).unwrap();
        assert!(matches!(
            BlockedDirectBackend::default().create(&descriptor, 2),
            Err(BackendError::Convolution(ConvolutionError::AllocationFailed { .. }))
        ));
    }

    #[test]
    fn test_rejects_fused_ops() {
        let info = ConvolutionInfo {
            fused_ops: FusedOps::Relu,
            ..descriptor().info().clone()
        };
        let descriptor = ConvolutionDescriptor::new(info).unwrap();
        assert!(matches!(
            BlockedDirectBackend::default().create(&descriptor, 1),
            Err(BackendError::Convolution(ConvolutionError::UnsupportedFusedOps { .. }))
        ));
    }
}
