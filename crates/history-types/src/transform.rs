use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw key of the transform parameter on assembly component features.
pub const TRANSFORM_PARAM: &str = "transform";
/// Raw key of the fixed flag on assembly component features.
pub const FIXED_PARAM: &str = "isFixed";

/// Position / rotation / scale as stored in feature parameters.
///
/// `rotation_euler` is in degrees, XYZ order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformParams {
    pub position: [f64; 3],
    pub rotation_euler: [f64; 3],
    pub scale: [f64; 3],
}

impl TransformParams {
    pub fn identity() -> Self {
        Self {
            position: [0.0; 3],
            rotation_euler: [0.0; 3],
            scale: [1.0; 3],
        }
    }

    /// JSON form written back into a feature's raw parameters.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "position": self.position,
            "rotationEuler": self.rotation_euler,
            "scale": self.scale,
        })
    }
}

impl Default for TransformParams {
    fn default() -> Self {
        Self::identity()
    }
}
