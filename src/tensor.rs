//! NCHW activation tensors and KCRS filter tensors.
//!
//! A [`Tensor4D`] owns a flat buffer whose physical extent may include a zero
//! border of `pad_h` rows and `pad_w` columns around every image plane. The
//! active window is the real data region inside that border. The reference
//! engine only ever borrows these tensors; allocation happens here, in the caller.

use crate::errors::{ConvolutionError, ConvolutionResult};

/// Allocates `len` copies of `value`, reporting allocation failure as an error.
pub(crate) fn allocate<T: Clone>(len: usize, value: T) -> ConvolutionResult<Vec<T>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| ConvolutionError::AllocationFailed {
            elements: len,
            element_size: std::mem::size_of::<T>(),
        })?;
    data.resize(len, value);
    Ok(data)
}

/// Error for a buffer whose element count does not fit in `usize`.
pub(crate) fn size_overflow(element_size: usize) -> ConvolutionError {
    ConvolutionError::AllocationFailed {
        elements: usize::MAX,
        element_size,
    }
}

/// `size + 2 * pad`, or `None` on overflow.
pub(crate) fn padded_size(size: usize, pad: usize) -> Option<usize> {
    pad.checked_mul(2)?.checked_add(size)
}

/// Product of `extent`, or `None` on overflow.
pub(crate) fn checked_len(extent: &[usize]) -> Option<usize> {
    extent.iter().try_fold(1usize, |len, &dim| len.checked_mul(dim))
}

/// Logical NCHW tensor with a physical extent and an active window.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor4D<T> {
    data: Vec<T>,
    extent: [usize; 4],
    pad_h: usize,
    pad_w: usize,
}

impl<T: Copy + Default> Tensor4D<T> {
    /// Allocates a zero-filled tensor whose active window is `height x width`,
    /// surrounded by a `pad_h x pad_w` border.
    pub fn zeroed(
        batch: usize,
        channels: usize,
        height: usize,
        width: usize,
        pad_h: usize,
        pad_w: usize,
    ) -> ConvolutionResult<Self> {
        let overflow = || size_overflow(std::mem::size_of::<T>());
        let extent = [
            batch,
            channels,
            padded_size(height, pad_h).ok_or_else(overflow)?,
            padded_size(width, pad_w).ok_or_else(overflow)?,
        ];
        let len = checked_len(&extent).ok_or_else(overflow)?;
        let data = allocate(len, T::default())?;
        Ok(Self {
            data,
            extent,
            pad_h,
            pad_w,
        })
    }

    /// Wraps an existing physical NCHW buffer.
    pub fn from_vec(
        extent: [usize; 4],
        pad_h: usize,
        pad_w: usize,
        data: Vec<T>,
    ) -> ConvolutionResult<Self> {
        let fits = |size: usize, pad: usize| padded_size(0, pad).is_some_and(|border| size >= border);
        let expected = checked_len(&extent);
        if expected != Some(data.len()) || !fits(extent[2], pad_h) || !fits(extent[3], pad_w) {
            return Err(ConvolutionError::ShapeMismatch {
                tensor: "activation".to_string(),
                expected: extent,
                actual: [data.len(), 1, 1, 1],
            });
        }
        Ok(Self {
            data,
            extent,
            pad_h,
            pad_w,
        })
    }

    /// Physical extent `[N, C, H + 2 * pad_h, W + 2 * pad_w]`.
    pub fn extent(&self) -> [usize; 4] {
        self.extent
    }

    pub fn batch(&self) -> usize {
        self.extent[0]
    }

    pub fn channels(&self) -> usize {
        self.extent[1]
    }

    pub fn pad_h(&self) -> usize {
        self.pad_h
    }

    pub fn pad_w(&self) -> usize {
        self.pad_w
    }

    pub fn active_height(&self) -> usize {
        self.extent[2] - 2 * self.pad_h
    }

    pub fn active_width(&self) -> usize {
        self.extent[3] - 2 * self.pad_w
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Flat index of a physical coordinate.
    #[inline]
    pub fn index(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        ((n * self.extent[1] + c) * self.extent[2] + h) * self.extent[3] + w
    }

    /// Flat index of a coordinate inside the active window.
    #[inline]
    pub fn active_index(&self, n: usize, c: usize, y: usize, x: usize) -> usize {
        self.index(n, c, y + self.pad_h, x + self.pad_w)
    }

    pub fn get(&self, n: usize, c: usize, y: usize, x: usize) -> T {
        self.data[self.active_index(n, c, y, x)]
    }

    pub fn set(&mut self, n: usize, c: usize, y: usize, x: usize, value: T) {
        let index = self.active_index(n, c, y, x);
        self.data[index] = value;
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    /// Fills the active window in NCHW order from `next`, leaving the border untouched.
    pub fn fill_active_with<F: FnMut() -> T>(&mut self, mut next: F) {
        let [batch, channels, _, _] = self.extent;
        let (height, width) = (self.active_height(), self.active_width());
        for n in 0..batch {
            for c in 0..channels {
                for y in 0..height {
                    let row = self.active_index(n, c, y, 0);
                    for value in &mut self.data[row..row + width] {
                        *value = next();
                    }
                }
            }
        }
    }

    /// Sets every element outside the active window to zero.
    pub fn zero_border(&mut self) {
        if self.pad_h == 0 && self.pad_w == 0 {
            return;
        }
        let [batch, channels, height, width] = self.extent;
        for n in 0..batch {
            for c in 0..channels {
                for h in 0..height {
                    let row = self.index(n, c, h, 0);
                    if h < self.pad_h || h >= height - self.pad_h {
                        self.data[row..row + width].fill(T::default());
                    } else {
                        self.data[row..row + self.pad_w].fill(T::default());
                        self.data[row + width - self.pad_w..row + width].fill(T::default());
                    }
                }
            }
        }
    }

    /// Copies the active window of `source` into the active window of `self`.
    ///
    /// Both tensors must agree on batch, channels and active size; their borders may differ.
    pub fn embed(&mut self, source: &Tensor4D<T>) -> ConvolutionResult<()> {
        let same_window = source.batch() == self.batch()
            && source.channels() == self.channels()
            && source.active_height() == self.active_height()
            && source.active_width() == self.active_width();
        if !same_window {
            return Err(ConvolutionError::ShapeMismatch {
                tensor: "embedded".to_string(),
                expected: [
                    self.batch(),
                    self.channels(),
                    self.active_height(),
                    self.active_width(),
                ],
                actual: [
                    source.batch(),
                    source.channels(),
                    source.active_height(),
                    source.active_width(),
                ],
            });
        }

        let width = self.active_width();
        for n in 0..self.batch() {
            for c in 0..self.channels() {
                for y in 0..self.active_height() {
                    let from = source.active_index(n, c, y, 0);
                    let to = self.active_index(n, c, y, 0);
                    self.data[to..to + width].copy_from_slice(&source.data[from..from + width]);
                }
            }
        }
        Ok(())
    }

    /// Returns a copy of this tensor surrounded by a zero border of the given size.
    pub fn padded(&self, pad_h: usize, pad_w: usize) -> ConvolutionResult<Self> {
        let mut padded = Self::zeroed(
            self.batch(),
            self.channels(),
            self.active_height(),
            self.active_width(),
            pad_h,
            pad_w,
        )?;
        padded.embed(self)?;
        Ok(padded)
    }

    /// Fails unless the physical extent equals `expected`.
    pub fn check_extent(&self, tensor: &str, expected: [usize; 4]) -> ConvolutionResult<()> {
        if self.extent != expected {
            return Err(ConvolutionError::ShapeMismatch {
                tensor: tensor.to_string(),
                expected,
                actual: self.extent,
            });
        }
        Ok(())
    }
}

/// Logical KCRS filter: output channel, input channel, kernel row, kernel column.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterTensor<T> {
    data: Vec<T>,
    extent: [usize; 4],
}

impl<T: Copy + Default> FilterTensor<T> {
    pub fn zeroed(
        output_channels: usize,
        input_channels: usize,
        kernel_height: usize,
        kernel_width: usize,
    ) -> ConvolutionResult<Self> {
        let extent = [output_channels, input_channels, kernel_height, kernel_width];
        let len = checked_len(&extent).ok_or_else(|| size_overflow(std::mem::size_of::<T>()))?;
        let data = allocate(len, T::default())?;
        Ok(Self { data, extent })
    }

    pub fn from_vec(extent: [usize; 4], data: Vec<T>) -> ConvolutionResult<Self> {
        if checked_len(&extent) != Some(data.len()) {
            return Err(ConvolutionError::ShapeMismatch {
                tensor: "filter".to_string(),
                expected: extent,
                actual: [data.len(), 1, 1, 1],
            });
        }
        Ok(Self { data, extent })
    }

    pub fn extent(&self) -> [usize; 4] {
        self.extent
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    #[inline]
    pub fn index(&self, k: usize, c: usize, r: usize, s: usize) -> usize {
        ((k * self.extent[1] + c) * self.extent[2] + r) * self.extent[3] + s
    }

    pub fn get(&self, k: usize, c: usize, r: usize, s: usize) -> T {
        self.data[self.index(k, c, r, s)]
    }

    pub fn set(&mut self, k: usize, c: usize, r: usize, s: usize, value: T) {
        let index = self.index(k, c, r, s);
        self.data[index] = value;
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    pub fn fill_with<F: FnMut() -> T>(&mut self, mut next: F) {
        for value in &mut self.data {
            *value = next();
        }
    }

    pub fn check_extent(&self, expected: [usize; 4]) -> ConvolutionResult<()> {
        if self.extent != expected {
            return Err(ConvolutionError::ShapeMismatch {
                tensor: "filter".to_string(),
                expected,
                actual: self.extent,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_keeps_zero_border() {
        let mut tensor = Tensor4D::<i16>::zeroed(1, 1, 2, 2, 0, 0).unwrap();
        tensor.fill(5);
        let padded = tensor.padded(1, 2).unwrap();

        assert_eq!(padded.extent(), [1, 1, 4, 6]);
        assert_eq!(padded.get(0, 0, 0, 0), 5);
        assert_eq!(padded.get(0, 0, 1, 1), 5);
        assert_eq!(padded.as_slice().iter().filter(|&&v| v == 5).count(), 4);
        assert_eq!(padded.as_slice()[padded.index(0, 0, 0, 0)], 0);
        assert_eq!(padded.as_slice()[padded.index(0, 0, 1, 2)], 5);
    }

    #[test]
    fn test_zero_border_leaves_active_window() {
        let mut tensor = Tensor4D::<i32>::zeroed(2, 2, 3, 3, 1, 1).unwrap();
        tensor.fill(7);
        tensor.zero_border();

        let active = tensor.as_slice().iter().filter(|&&v| v == 7).count();
        assert_eq!(active, 2 * 2 * 3 * 3);
        assert_eq!(tensor.get(1, 1, 2, 2), 7);
        let corner = tensor.index(1, 1, 4, 4);
        assert_eq!(tensor.as_slice()[corner], 0);
    }

    #[test]
    fn test_fill_active_with_skips_border() {
        let mut tensor = Tensor4D::<i16>::zeroed(1, 1, 2, 3, 1, 0).unwrap();
        let mut counter = 0;
        tensor.fill_active_with(|| {
            counter += 1;
            counter
        });
        assert_eq!(counter, 6);
        assert_eq!(&tensor.as_slice()[..3], &[0, 0, 0]);
        assert_eq!(&tensor.as_slice()[3..9], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_embed_rejects_mismatched_window() {
        let source = Tensor4D::<i16>::zeroed(1, 1, 2, 2, 0, 0).unwrap();
        let mut target = Tensor4D::<i16>::zeroed(1, 1, 3, 2, 1, 1).unwrap();
        assert!(matches!(
            target.embed(&source),
            Err(ConvolutionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_overflowing_extent_is_an_allocation_error() {
        let result = Tensor4D::<i16>::zeroed(usize::MAX / 2, 3, 1, 1, 0, 0);
        assert!(matches!(
            result,
            Err(ConvolutionError::AllocationFailed {
                elements: usize::MAX,
                element_size: 2
            })
        ));
        assert!(matches!(
            Tensor4D::<i32>::zeroed(1, 1, 1, 1, usize::MAX / 2, 0),
            Err(ConvolutionError::AllocationFailed { .. })
        ));
        assert!(matches!(
            FilterTensor::<i16>::zeroed(usize::MAX / 2, 2, 2, 1),
            Err(ConvolutionError::AllocationFailed { .. })
        ));
    }

    #[test]
    fn test_unreservable_buffer_is_an_allocation_error() {
        assert!(matches!(
            FilterTensor::<i16>::zeroed(usize::MAX / 4, 3, 1, 1),
            Err(ConvolutionError::AllocationFailed { .. })
        ));
    }

    #[test]
    fn test_filter_kcrs_index() {
        let filter = FilterTensor::<i16>::zeroed(2, 3, 4, 5).unwrap();
        assert_eq!(filter.index(1, 2, 3, 4), 2 * 3 * 4 * 5 - 1);
        assert_eq!(filter.index(0, 1, 0, 0), 20);
    }
}
