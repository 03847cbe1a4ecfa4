//! Drives one validation run: data generation, ground truth, the implementation
//! under test, comparison and timing.

use log::{debug, info};

use crate::backend::{
    ComputeKind, ConvolutionBackend, ConvolutionHandle, ExternalBuffer, ExternalBufferMut, LinkedTensor,
    ScratchBuffer, TensorRole, execute_collective,
};
use crate::convolution_descriptor::ConvolutionDescriptor;
use crate::data_generator::DataGenerator;
use crate::error_metrics::ErrorMetrics;
use crate::errors::{ConvolutionResult, HarnessResult, ValidationResult};
use crate::naive_convolution::NaiveConvolution;
use crate::performance_timer::{PerformanceResults, PerformanceTimer, perf_dump_line};
use crate::tensor::{FilterTensor, Tensor4D, allocate};

use super::harness_config::{HarnessConfig, ValidationConfig};

/// Byte pattern written over scratch before it is handed to the backend.
const SCRATCH_POISON: u8 = 0xA5;

const MIB: f64 = 1024.0 * 1024.0;

/// Result of one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    /// Zero when checking is disabled.
    pub metrics: ErrorMetrics,
    pub performance: PerformanceResults,
}

/// Result of a whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessReport {
    pub forward: Option<PassReport>,
    pub backward: Option<PassReport>,
    /// Worst case over all checked passes.
    pub combined: ErrorMetrics,
    pub checked: bool,
}

impl HarnessReport {
    pub fn verdict(&self, validation: &ValidationConfig) -> ValidationResult<()> {
        validation.check(&self.combined)
    }
}

/// Validates a backend against the naive reference engine.
pub struct ReferenceHarness<B: ConvolutionBackend> {
    config: HarnessConfig,
    validation: ValidationConfig,
    backend: B,
    descriptor: ConvolutionDescriptor,
}

impl<B: ConvolutionBackend> ReferenceHarness<B> {
    /// Validates the layer configuration; nothing is allocated yet.
    pub fn new(config: HarnessConfig, validation: ValidationConfig, backend: B) -> HarnessResult<Self> {
        let descriptor = ConvolutionDescriptor::new(config.convolution.clone())?;
        Ok(Self {
            config,
            validation,
            backend,
            descriptor,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn validation(&self) -> &ValidationConfig {
        &self.validation
    }

    pub fn descriptor(&self) -> &ConvolutionDescriptor {
        &self.descriptor
    }

    pub fn threads(&self) -> usize {
        self.config.parallel_config().get_threads()
    }

    /// Ground-truth forward output in the descriptor's physical output extent.
    pub fn reference_forward(
        &self,
        input: &Tensor4D<i16>,
        filter: &FilterTensor<i16>,
    ) -> ConvolutionResult<Tensor4D<i32>> {
        let d = &self.descriptor;
        let layout = d.layout();
        let mut output = Tensor4D::zeroed(
            d.batch(),
            d.output_channels(),
            layout.ofh,
            layout.ofw,
            layout.pad_h_out,
            layout.pad_w_out,
        )?;
        NaiveConvolution::new(d, self.config.parallel_config()).forward(input, filter, &mut output)?;
        Ok(output)
    }

    /// Ground-truth input gradient in the descriptor's physical input extent.
    pub fn reference_backward_data(
        &self,
        output_grad: &Tensor4D<i16>,
        filter: &FilterTensor<i16>,
    ) -> ConvolutionResult<Tensor4D<i32>> {
        let d = &self.descriptor;
        let layout = d.layout();
        let mut input_grad = Tensor4D::zeroed(
            d.batch(),
            d.input_channels(),
            d.input_height(),
            d.input_width(),
            layout.pad_h_in,
            layout.pad_w_in,
        )?;
        NaiveConvolution::new(d, self.config.parallel_config()).backward_data(output_grad, filter, &mut input_grad)?;
        Ok(input_grad)
    }

    pub fn print_summary(&self) {
        let d = &self.descriptor;
        let layout = d.layout();
        let threads = self.threads();
        let (n, c, k) = (d.batch() as f64, d.input_channels() as f64, d.output_channels() as f64);
        let input_plane = (layout.ifhp * layout.ifwp) as f64;
        let output_plane = (layout.ofhp * layout.ofwp) as f64;
        let weights = (d.output_channels() * d.input_channels() * d.kernel_height() * d.kernel_width()) as f64;

        println!("##########################################");
        println!("#          Setting Up (Common)           #");
        println!("##########################################");
        println!(
            "PARAMS: W:{}  H:{}  N:{}  C:{}  K:{}  R:{}  S:{}  STRIDE:{}",
            d.input_width(),
            d.input_height(),
            d.batch(),
            d.input_channels(),
            d.output_channels(),
            d.kernel_height(),
            d.kernel_width(),
            d.stride_h()
        );
        println!(
            "PARAMS: ITERS:{}  Threads:{}  PASS:{}  PADDING:{:?}",
            self.config.iterations,
            threads,
            self.config.pass,
            d.strategy()
        );
        println!(
            " InImg {}x{} Padded ({}x{})",
            d.input_height(),
            d.input_width(),
            layout.ifhp,
            layout.ifwp
        );
        println!(
            "OutImg {}x{} Padded ({}x{})",
            layout.ofh, layout.ofw, layout.ofhp, layout.ofwp
        );
        println!("SIZE Input  (MB): {:10.2} MiB", n * c * input_plane * 2.0 / MIB);
        println!("SIZE Output (MB): {:10.2} MiB", n * k * output_plane * 4.0 / MIB);
        println!("SIZE Input   (1): {:10.2} MiB", c * input_plane * 2.0 / MIB);
        println!("SIZE Output  (1): {:10.2} MiB", k * output_plane * 4.0 / MIB);
        println!("SIZE Weight     : {:10.2} MiB", weights * 2.0 / MIB);
    }

    /// Runs every selected pass and returns the collected statistics.
    ///
    /// The verdict is not applied here; see [`HarnessReport::verdict`].
    pub fn run(&self) -> HarnessResult<HarnessReport> {
        self.print_summary();

        let d = &self.descriptor;
        let threads = self.threads();
        let pass = self.config.pass;
        let checking = self.validation.is_enabled();

        let mut generator = DataGenerator::new(self.config.seed, self.config.init);
        let input = generator.generate_input(d)?;
        let filter = generator.generate_filter(d)?;
        let output_grad = if pass.runs_backward() {
            Some(generator.generate_output_grad(d)?)
        } else {
            None
        };
        debug!("generated {:?} data with seed {}", generator.pattern(), self.config.seed);

        let mut handle = self.backend.create(d, threads)?;
        info!("validating backend '{}' on {} threads", self.backend.name(), threads);

        let mut filter_tensor = handle.link_tensor(TensorRole::Filter)?;
        filter_tensor.copy_in(ExternalBuffer::I16(filter.as_slice()), TensorRole::Filter.external_layout())?;
        handle.bind(TensorRole::Filter, filter_tensor)?;

        let mut kinds = Vec::new();
        if pass.runs_forward() {
            let mut input_tensor = handle.link_tensor(TensorRole::Input)?;
            input_tensor.copy_in(ExternalBuffer::I16(input.as_slice()), TensorRole::Input.external_layout())?;
            handle.bind(TensorRole::Input, input_tensor)?;
            let output_tensor = handle.link_tensor(TensorRole::Output)?;
            handle.bind(TensorRole::Output, output_tensor)?;
            kinds.push(ComputeKind::Forward);
        }
        if let Some(output_grad) = &output_grad {
            let mut grad_tensor = handle.link_tensor(TensorRole::OutputGrad)?;
            grad_tensor.copy_in(
                ExternalBuffer::I16(output_grad.as_slice()),
                TensorRole::OutputGrad.external_layout(),
            )?;
            handle.bind(TensorRole::OutputGrad, grad_tensor)?;
            let input_grad_tensor = handle.link_tensor(TensorRole::InputGrad)?;
            handle.bind(TensorRole::InputGrad, input_grad_tensor)?;
            kinds.push(ComputeKind::BackwardData);
        }

        let mut scratch_kinds = Vec::new();
        for &kind in &kinds {
            let bytes = handle.required_scratch(kind)?;
            if bytes > 0 {
                let mut scratch = ScratchBuffer::allocate(bytes)?;
                scratch.poison(SCRATCH_POISON);
                handle.bind_scratch(kind, scratch)?;
                scratch_kinds.push(kind);
                debug!("bound {} bytes of scratch for {:?}", bytes, kind);
            }
        }

        let mut combined = ErrorMetrics::default();
        let mut forward = None;
        let mut backward = None;

        if pass.runs_forward() {
            let reference = if checking {
                Some(self.reference_forward(&input, &filter)?)
            } else {
                None
            };
            let report = self.run_pass(&handle, ComputeKind::Forward, TensorRole::Output, reference)?;
            combined = combined.reduce(&report.metrics);
            forward = Some(report);
        }

        if let Some(output_grad) = &output_grad {
            let reference = if checking {
                Some(self.reference_backward_data(output_grad, &filter)?)
            } else {
                None
            };
            let report = self.run_pass(&handle, ComputeKind::BackwardData, TensorRole::InputGrad, reference)?;
            combined = combined.reduce(&report.metrics);
            backward = Some(report);
        }

        for kind in scratch_kinds {
            handle.release_scratch(kind)?;
        }
        for role in [
            TensorRole::Filter,
            TensorRole::Input,
            TensorRole::Output,
            TensorRole::OutputGrad,
            TensorRole::InputGrad,
        ] {
            if handle.tensor(role).is_ok() {
                handle.release(role)?;
            }
        }
        handle.destroy();

        Ok(HarnessReport {
            forward,
            backward,
            combined,
            checked: checking,
        })
    }

    fn run_pass(
        &self,
        handle: &B::Handle,
        kind: ComputeKind,
        result_role: TensorRole,
        reference: Option<Tensor4D<i32>>,
    ) -> HarnessResult<PassReport> {
        let (label, tag) = match kind {
            ComputeKind::Forward => ("FWD", "FP"),
            _ => ("BWD", "BP"),
        };

        let metrics = match reference {
            Some(reference) => {
                execute_collective(handle, kind)?;
                let mut test = allocate(reference.len(), 0i32)?;
                handle
                    .tensor(result_role)?
                    .copy_out(ExternalBufferMut::I32(&mut test), result_role.external_layout())?;
                let metrics = ErrorMetrics::compare(reference.as_slice(), &test)?;

                println!("##########################################");
                println!("#   Correctness - {} (NCHW-Storage)     #", label);
                println!("##########################################");
                println!("{}", metrics);
                metrics
            }
            None => ErrorMetrics::default(),
        };

        println!("##########################################");
        println!("#   Performance - {} (NCHW-Storage)     #", label);
        println!("##########################################");
        let timer = PerformanceTimer::new(self.config.warmup_iterations);
        let performance = timer.measure(
            label,
            self.config.iterations,
            self.descriptor.low_precision_ops(),
            || execute_collective(handle, kind),
        )?;
        performance.print_summary();
        println!(
            "{}",
            perf_dump_line(tag, handle.threads(), &self.descriptor, &performance, &metrics)
        );

        Ok(PassReport { metrics, performance })
    }
}
