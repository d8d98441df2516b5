use std::path::Path;
use std::sync::Mutex;
use tch::{CModule, Device, Kind, Tensor, nn::ModuleT};

use super::InferenceError;
use super::local::ScoringModel;
use super::preprocess::FrameTensor;

/// TorchScript classifier. Output index 0 is the "AI generated" class.
pub struct TorchModel {
    module: Mutex<CModule>,
    device: Device,
}

impl TorchModel {
    pub fn load(path: &Path) -> Result<Self, InferenceError> {
        if !path.exists() {
            return Err(InferenceError::BackendUnavailable(format!(
                "model file not found: {}",
                path.display()
            )));
        }
        let device = Device::cuda_if_available();
        let module = CModule::load_on_device(path, device).map_err(|e| {
            InferenceError::BackendUnavailable(format!("failed to load {}: {}", path.display(), e))
        })?;
        Ok(Self {
            module: Mutex::new(module),
            device,
        })
    }
}

impl ScoringModel for TorchModel {
    fn score(&self, frame: &FrameTensor) -> Result<f64, InferenceError> {
        let size = frame.size as i64;
        let input = Tensor::from_slice(&frame.data)
            .view([1, 3, size, size])
            .to_device(self.device);
        let module = self
            .module
            .lock()
            .map_err(|_| InferenceError::Model("model lock poisoned".into()))?;
        let output = tch::no_grad(|| module.forward_t(&input, false));
        let output = output.to_kind(Kind::Float).view([-1]);
        let probabilities = if output.size()[0] == 1 {
            output.sigmoid()
        } else {
            output.softmax(-1, Kind::Float)
        };
        Ok(probabilities.double_value(&[0]))
    }
}
