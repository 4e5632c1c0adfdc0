use std::ffi::CString;
use std::fmt::Write as _;
use std::os::raw::{c_char, c_int, c_void};
use std::path::Path;
use std::ptr;

use tracing::info;

use crate::engine::{EngineSpec, InferenceEngine, RawDetectionBatch, CONTRACT_VERSION, OUTPUT_ARITY};
use crate::preprocess::InputTensor;
use crate::EngineError;

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;

const TFLITE_OK: c_int = 0;
const TFLITE_FLOAT32: c_int = 1;

#[link(name = "tensorflowlite_c")]
extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: c_int);

    fn TfLiteInterpreterCreate(model: *const TfLiteModel, options: *const TfLiteInterpreterOptions) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensorCount(interpreter: *const TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterGetInputTensor(interpreter: *const TfLiteInterpreter, index: c_int) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensorCount(interpreter: *const TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterGetOutputTensor(interpreter: *const TfLiteInterpreter, index: c_int) -> *const TfLiteTensor;

    fn TfLiteTensorType(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: c_int) -> c_int;
    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;
    fn TfLiteTensorCopyFromBuffer(tensor: *mut TfLiteTensor, input_data: *const c_void, input_data_size: usize) -> c_int;
    fn TfLiteTensorCopyToBuffer(tensor: *const TfLiteTensor, output_data: *mut c_void, output_data_size: usize) -> c_int;
}

/// SSD detector on the TensorFlow Lite C API.
///
/// Expects one float32 `[1, D, D, 3]` input and the four post-processed
/// outputs `[1, N, 4]` boxes, `[1, N]` classes, `[1, N]` scores, `[1]` count.
/// The shapes are checked when the model is loaded.
pub struct TfliteEngine {
    model: *mut TfLiteModel,
    opts: *mut TfLiteInterpreterOptions,
    interp: *mut TfLiteInterpreter,
    input_size: u32,
    max_detections: usize,
}

// The interpreter is only ever driven from the thread that owns the engine.
unsafe impl Send for TfliteEngine {}

impl TfliteEngine {
    pub fn load(model_path: &Path, threads: i32) -> Result<Self, EngineError> {
        let load_err = |reason: &str| EngineError::Load {
            path: model_path.to_path_buf(),
            reason: reason.to_string(),
        };
        let path_str = model_path.to_str().ok_or_else(|| load_err("path is not UTF-8"))?;
        let cpath = CString::new(path_str).map_err(|_| load_err("path contains a NUL byte"))?;

        // Drop frees whatever was created if a later step fails.
        let mut engine = Self {
            model: ptr::null_mut(),
            opts: ptr::null_mut(),
            interp: ptr::null_mut(),
            input_size: 0,
            max_detections: 0,
        };

        engine.model = unsafe { TfLiteModelCreateFromFile(cpath.as_ptr()) };
        if engine.model.is_null() {
            return Err(load_err("TfLiteModelCreateFromFile returned null"));
        }
        engine.opts = unsafe { TfLiteInterpreterOptionsCreate() };
        if engine.opts.is_null() {
            return Err(load_err("failed to create interpreter options"));
        }
        unsafe { TfLiteInterpreterOptionsSetNumThreads(engine.opts, threads.max(1)) };

        engine.interp = unsafe { TfLiteInterpreterCreate(engine.model, engine.opts) };
        if engine.interp.is_null() {
            return Err(load_err("failed to create interpreter"));
        }
        let rc = unsafe { TfLiteInterpreterAllocateTensors(engine.interp) };
        if rc != TFLITE_OK {
            return Err(load_err("TfLiteInterpreterAllocateTensors failed"));
        }

        engine.input_size = engine.check_input()?;
        engine.max_detections = engine.check_outputs()?;

        info!(
            "engine: loaded TFLite model {} (input {}x{}, {} slots)",
            model_path.display(),
            engine.input_size,
            engine.input_size,
            engine.max_detections
        );
        Ok(engine)
    }

    fn check_input(&self) -> Result<u32, EngineError> {
        let count = unsafe { TfLiteInterpreterGetInputTensorCount(self.interp) };
        if count != 1 {
            return Err(EngineError::Contract(format!("model has {} inputs, expected 1", count)));
        }
        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        if input.is_null() {
            return Err(EngineError::Contract("no input tensor".into()));
        }
        if unsafe { TfLiteTensorType(input) } != TFLITE_FLOAT32 {
            return Err(EngineError::Contract("input tensor is not float32".into()));
        }
        match tensor_dims(input).as_slice() {
            [1, h, w, 3] if h == w && *h > 0 => Ok(*h as u32),
            other => Err(EngineError::Contract(format!(
                "input dims {:?}, expected [1, D, D, 3]",
                other
            ))),
        }
    }

    fn check_outputs(&self) -> Result<usize, EngineError> {
        let count = unsafe { TfLiteInterpreterGetOutputTensorCount(self.interp) };
        if count as usize != OUTPUT_ARITY {
            return Err(EngineError::Contract(format!(
                "model has {} outputs, expected {}",
                count, OUTPUT_ARITY
            )));
        }
        let dims: Vec<Vec<i32>> = (0..count).map(|i| tensor_dims(self.output(i))).collect();
        match (dims[0].as_slice(), dims[1].as_slice(), dims[2].as_slice(), dims[3].as_slice()) {
            ([1, n, 4], [1, c], [1, s], [1]) if n == c && n == s && *n > 0 => Ok(*n as usize),
            _ => Err(EngineError::Contract(format!(
                "output dims {:?}, expected [1,N,4] [1,N] [1,N] [1]",
                dims
            ))),
        }
    }

    fn output(&self, index: c_int) -> *const TfLiteTensor {
        unsafe { TfLiteInterpreterGetOutputTensor(self.interp, index) }
    }

    fn read_output(&self, index: c_int, len: usize) -> Result<Vec<f32>, EngineError> {
        let tensor = self.output(index);
        if tensor.is_null() {
            return Err(EngineError::Malformed(format!("output {} missing", index)));
        }
        let bytes = len * std::mem::size_of::<f32>();
        let have = unsafe { TfLiteTensorByteSize(tensor) };
        if have != bytes {
            return Err(EngineError::Malformed(format!(
                "output {} holds {} bytes, expected {}",
                index, have, bytes
            )));
        }
        let mut out = vec![0f32; len];
        let rc = unsafe { TfLiteTensorCopyToBuffer(tensor, out.as_mut_ptr() as *mut c_void, bytes) };
        if rc != TFLITE_OK {
            return Err(EngineError::Fault(format!("copy of output {} failed", index)));
        }
        Ok(out)
    }

    pub fn inspect(&self) -> String {
        let mut s = String::from("TFLite inspect:\n");
        let inputs = unsafe { TfLiteInterpreterGetInputTensorCount(self.interp) };
        for i in 0..inputs {
            let t = unsafe { TfLiteInterpreterGetInputTensor(self.interp, i) };
            let _ = writeln!(s, "- input[{}] dims={:?} bytes={}", i, tensor_dims(t), unsafe { TfLiteTensorByteSize(t) });
        }
        let outputs = unsafe { TfLiteInterpreterGetOutputTensorCount(self.interp) };
        for i in 0..outputs {
            let t = self.output(i);
            let _ = writeln!(s, "- output[{}] dims={:?} bytes={}", i, tensor_dims(t), unsafe { TfLiteTensorByteSize(t) });
        }
        s
    }
}

impl InferenceEngine for TfliteEngine {
    fn spec(&self) -> EngineSpec {
        EngineSpec {
            name: "tflite",
            input_size: self.input_size,
            max_detections: self.max_detections,
            output_arity: OUTPUT_ARITY,
            contract_version: CONTRACT_VERSION,
        }
    }

    fn detect(&mut self, input: &InputTensor) -> Result<RawDetectionBatch, EngineError> {
        if input.size() != self.input_size {
            return Err(EngineError::Malformed(format!(
                "input tensor is {}x{}, model expects {}x{}",
                input.size(),
                input.size(),
                self.input_size,
                self.input_size
            )));
        }
        let tensor = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        if tensor.is_null() {
            return Err(EngineError::Fault("no input tensor".into()));
        }
        let data = input.as_slice();
        let bytes = std::mem::size_of_val(data);
        let rc = unsafe { TfLiteTensorCopyFromBuffer(tensor, data.as_ptr() as *const c_void, bytes) };
        if rc != TFLITE_OK {
            return Err(EngineError::Fault("TfLiteTensorCopyFromBuffer failed".into()));
        }

        let rc = unsafe { TfLiteInterpreterInvoke(self.interp) };
        if rc != TFLITE_OK {
            return Err(EngineError::Fault("TfLiteInterpreterInvoke failed".into()));
        }

        let n = self.max_detections;
        let boxes = self.read_output(0, n * 4)?;
        let classes = self.read_output(1, n)?;
        let scores = self.read_output(2, n)?;
        let count = self.read_output(3, 1)?;

        Ok(RawDetectionBatch {
            boxes: boxes.chunks_exact(4).map(|c| [c[0], c[1], c[2], c[3]]).collect(),
            classes,
            scores,
            count: count[0],
        })
    }
}

fn tensor_dims(t: *const TfLiteTensor) -> Vec<i32> {
    if t.is_null() {
        return Vec::new();
    }
    unsafe {
        let nd = TfLiteTensorNumDims(t);
        (0..nd).map(|i| TfLiteTensorDim(t, i)).collect()
    }
}

impl Drop for TfliteEngine {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() { TfLiteInterpreterDelete(self.interp); }
            if !self.opts.is_null() { TfLiteInterpreterOptionsDelete(self.opts); }
            if !self.model.is_null() { TfLiteModelDelete(self.model); }
        }
    }
}
