// THEORY:
// The `operation` module defines the atomic unit of the processing pipeline. An
// `Operation` is a small, immutable value describing *what* a pipeline stage
// should do and with which parameters. It never does the work itself; running
// an operation is the job of an `OperationExecutor` supplied by the application.
//
// Key architectural principles:
// 1.  **Closed Set of Variants**: Every operation the pipeline knows about is a
//     variant of one enum. Adding an operation means adding a variant, and the
//     compiler then points at every `match` that needs to learn about it.
// 2.  **Stage Categories**: Each variant belongs to exactly one `StageCategory`
//     (acquisition, pre-transform, transform, post-transform, results). The
//     category is a pure function of the variant, so it can never drift after
//     construction.
// 3.  **Value Semantics**: Two operations are equal when their variant and
//     parameters are equal. Identity plays no role, which is what makes
//     candidate lists comparable after a save/load round trip. Float parameters
//     compare NaN equal to NaN, and non-finite values are persisted as strings
//     (`"NaN"`, `"inf"`, `"-inf"`) since JSON numbers cannot hold them.
// 4.  **Canonical Type Names**: `OperationKind::type_name` gives every variant a
//     stable `"<category>.<variant>"` string. It is used as the persisted tag and
//     as the tie-break when ordering stage keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The pipeline stage a family of operations belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageCategory {
    /// Loading the diffraction pattern to analyse.
    PatternAcquisition,
    /// Filters applied to the pattern before the Hough transform.
    PreTransform,
    /// The transform from pattern space to Hough space.
    Transform,
    /// Filters applied to the Hough image.
    PostTransform,
    /// Scalar results computed from the pattern or the Hough image.
    ResultComputation,
}

impl StageCategory {
    /// All categories in pipeline order.
    pub const ALL: [StageCategory; 5] = [
        StageCategory::PatternAcquisition,
        StageCategory::PreTransform,
        StageCategory::Transform,
        StageCategory::PostTransform,
        StageCategory::ResultComputation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageCategory::PatternAcquisition => "pattern_acquisition",
            StageCategory::PreTransform => "pre_transform",
            StageCategory::Transform => "transform",
            StageCategory::PostTransform => "post_transform",
            StageCategory::ResultComputation => "result_computation",
        }
    }
}

impl fmt::Display for StageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The variant tag of an `Operation`, without its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    PatternFile,
    PatternSmp,
    Smoothing,
    Median,
    Binning,
    MaskDisc,
    Equalization,
    HoughTransform,
    Threshold,
    Butterfly,
    HoughCrop,
    ImageQuality,
    AverageIntensity,
    StdDevIntensity,
    PeakCount,
}

impl OperationKind {
    pub fn category(&self) -> StageCategory {
        match self {
            OperationKind::PatternFile | OperationKind::PatternSmp => StageCategory::PatternAcquisition,
            OperationKind::Smoothing
            | OperationKind::Median
            | OperationKind::Binning
            | OperationKind::MaskDisc
            | OperationKind::Equalization => StageCategory::PreTransform,
            OperationKind::HoughTransform => StageCategory::Transform,
            OperationKind::Threshold | OperationKind::Butterfly | OperationKind::HoughCrop => {
                StageCategory::PostTransform
            }
            OperationKind::ImageQuality
            | OperationKind::AverageIntensity
            | OperationKind::StdDevIntensity
            | OperationKind::PeakCount => StageCategory::ResultComputation,
        }
    }

    /// Canonical, stable name of the variant. Doubles as the serde tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            OperationKind::PatternFile => "pattern_acquisition.pattern_file",
            OperationKind::PatternSmp => "pattern_acquisition.pattern_smp",
            OperationKind::Smoothing => "pre_transform.smoothing",
            OperationKind::Median => "pre_transform.median",
            OperationKind::Binning => "pre_transform.binning",
            OperationKind::MaskDisc => "pre_transform.mask_disc",
            OperationKind::Equalization => "pre_transform.equalization",
            OperationKind::HoughTransform => "transform.hough_transform",
            OperationKind::Threshold => "post_transform.threshold",
            OperationKind::Butterfly => "post_transform.butterfly",
            OperationKind::HoughCrop => "post_transform.hough_crop",
            OperationKind::ImageQuality => "result_computation.image_quality",
            OperationKind::AverageIntensity => "result_computation.average_intensity",
            OperationKind::StdDevIntensity => "result_computation.std_dev_intensity",
            OperationKind::PeakCount => "result_computation.peak_count",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// A single, immutable pipeline step together with its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Operation {
    /// Reads a pattern from an image file.
    #[serde(rename = "pattern_acquisition.pattern_file")]
    PatternFile { path: String },
    /// Reads the pattern at `index` from a multi-pattern (SMP) file.
    #[serde(rename = "pattern_acquisition.pattern_smp")]
    PatternSmp { path: String, index: u32 },

    /// Mean filter with a square kernel.
    #[serde(rename = "pre_transform.smoothing")]
    Smoothing { kernel_size: u32 },
    #[serde(rename = "pre_transform.median")]
    Median { radius: u32 },
    /// Downsamples the pattern by an integer factor.
    #[serde(rename = "pre_transform.binning")]
    Binning { factor: u32 },
    /// Keeps only the disc of the pattern inside the detector area.
    #[serde(rename = "pre_transform.mask_disc")]
    MaskDisc { centroid_x: u32, centroid_y: u32, radius: u32 },
    #[serde(rename = "pre_transform.equalization")]
    Equalization,

    /// Hough transform with the given angular resolution, in degrees.
    #[serde(rename = "transform.hough_transform")]
    HoughTransform {
        #[serde(with = "float_param")]
        resolution: f64,
    },

    #[serde(rename = "post_transform.threshold")]
    Threshold { value: u32 },
    /// Butterfly convolution mask used to enhance Hough peaks.
    #[serde(rename = "post_transform.butterfly")]
    Butterfly {
        kernel_size: u32,
        #[serde(with = "float_param")]
        flatten_lower: f32,
        #[serde(with = "float_param")]
        flatten_upper: f32,
    },
    /// Drops the Hough rows beyond `radius` from the centre.
    #[serde(rename = "post_transform.hough_crop")]
    HoughCrop { radius: u32 },

    #[serde(rename = "result_computation.image_quality")]
    ImageQuality,
    #[serde(rename = "result_computation.average_intensity")]
    AverageIntensity,
    #[serde(rename = "result_computation.std_dev_intensity")]
    StdDevIntensity,
    /// Counts the Hough peaks, keeping at most `max`.
    #[serde(rename = "result_computation.peak_count")]
    PeakCount { max: u32 },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::PatternFile { .. } => OperationKind::PatternFile,
            Operation::PatternSmp { .. } => OperationKind::PatternSmp,
            Operation::Smoothing { .. } => OperationKind::Smoothing,
            Operation::Median { .. } => OperationKind::Median,
            Operation::Binning { .. } => OperationKind::Binning,
            Operation::MaskDisc { .. } => OperationKind::MaskDisc,
            Operation::Equalization => OperationKind::Equalization,
            Operation::HoughTransform { .. } => OperationKind::HoughTransform,
            Operation::Threshold { .. } => OperationKind::Threshold,
            Operation::Butterfly { .. } => OperationKind::Butterfly,
            Operation::HoughCrop { .. } => OperationKind::HoughCrop,
            Operation::ImageQuality => OperationKind::ImageQuality,
            Operation::AverageIntensity => OperationKind::AverageIntensity,
            Operation::StdDevIntensity => OperationKind::StdDevIntensity,
            Operation::PeakCount { .. } => OperationKind::PeakCount,
        }
    }

    pub fn category(&self) -> StageCategory {
        self.kind().category()
    }

    /// Human-readable name including the parameters, e.g. `Smoothing(3)`.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        use Operation::*;
        match (self, other) {
            (PatternFile { path: a }, PatternFile { path: b }) => a == b,
            (PatternSmp { path: a, index: i }, PatternSmp { path: b, index: j }) => a == b && i == j,
            (Smoothing { kernel_size: a }, Smoothing { kernel_size: b }) => a == b,
            (Median { radius: a }, Median { radius: b }) => a == b,
            (Binning { factor: a }, Binning { factor: b }) => a == b,
            (
                MaskDisc { centroid_x: ax, centroid_y: ay, radius: ar },
                MaskDisc { centroid_x: bx, centroid_y: by, radius: br },
            ) => (ax, ay, ar) == (bx, by, br),
            (HoughTransform { resolution: a }, HoughTransform { resolution: b }) => same_f64(*a, *b),
            (Threshold { value: a }, Threshold { value: b }) => a == b,
            (
                Butterfly { kernel_size: ak, flatten_lower: al, flatten_upper: au },
                Butterfly { kernel_size: bk, flatten_lower: bl, flatten_upper: bu },
            ) => ak == bk && same_f32(*al, *bl) && same_f32(*au, *bu),
            (HoughCrop { radius: a }, HoughCrop { radius: b }) => a == b,
            (PeakCount { max: a }, PeakCount { max: b }) => a == b,
            (Equalization, Equalization)
            | (ImageQuality, ImageQuality)
            | (AverageIntensity, AverageIntensity)
            | (StdDevIntensity, StdDevIntensity) => true,
            _ => false,
        }
    }
}

fn same_f64(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

fn same_f32(a: f32, b: f32) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

/// Serde model for float parameters: finite values are plain JSON numbers,
/// non-finite ones are written as their `Display` string and parsed back.
mod float_param {
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
    use std::fmt::Display;
    use std::str::FromStr;

    pub trait Float: Copy + Display + FromStr + Serialize {
        fn finite(self) -> bool;
    }

    impl Float for f32 {
        fn finite(self) -> bool {
            self.is_finite()
        }
    }

    impl Float for f64 {
        fn finite(self) -> bool {
            self.is_finite()
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr<T> {
        Number(T),
        Text(String),
    }

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Float,
        S: Serializer,
    {
        if value.finite() {
            value.serialize(serializer)
        } else {
            serializer.collect_str(value)
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: Float + Deserialize<'de>,
        <T as FromStr>::Err: Display,
        D: Deserializer<'de>,
    {
        match Repr::<T>::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::PatternFile { path } => write!(f, "PatternFile({})", path),
            Operation::PatternSmp { path, index } => write!(f, "PatternSmp({}#{})", path, index),
            Operation::Smoothing { kernel_size } => write!(f, "Smoothing({})", kernel_size),
            Operation::Median { radius } => write!(f, "Median({})", radius),
            Operation::Binning { factor } => write!(f, "Binning({})", factor),
            Operation::MaskDisc { centroid_x, centroid_y, radius } => {
                write!(f, "MaskDisc({}, {}, {})", centroid_x, centroid_y, radius)
            }
            Operation::Equalization => f.write_str("Equalization"),
            Operation::HoughTransform { resolution } => write!(f, "HoughTransform({})", resolution),
            Operation::Threshold { value } => write!(f, "Threshold({})", value),
            Operation::Butterfly { kernel_size, flatten_lower, flatten_upper } => {
                write!(f, "Butterfly({}, {}, {})", kernel_size, flatten_lower, flatten_upper)
            }
            Operation::HoughCrop { radius } => write!(f, "HoughCrop({})", radius),
            Operation::ImageQuality => f.write_str("ImageQuality"),
            Operation::AverageIntensity => f.write_str("AverageIntensity"),
            Operation::StdDevIntensity => f.write_str("StdDevIntensity"),
            Operation::PeakCount { max } => write!(f, "PeakCount({})", max),
        }
    }
}
