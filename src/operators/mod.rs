//! Built-in operators and the registry that exposes them by alias.
use crate::core::operator::{OperatorEntry, OperatorRegistry, ParameterSpec};

pub mod arithmetic;
pub mod db;
pub mod filter;
pub mod multilook;
pub mod read;
pub mod stack;
pub mod write;

pub use arithmetic::{ArithmeticOp, BandArithmeticOp};
pub use db::LinearToFromDbOp;
pub use filter::{FilterKind, ImageFilterOp};
pub use multilook::MultilookOp;
pub use read::{ProductSetReaderOp, ReadOp};
pub use stack::CreateStackOp;
pub use write::WriteOp;

pub const WRITE_OPERATOR: &str = "Write";

/// Registry holding every built-in operator.
pub fn builtin_registry() -> OperatorRegistry {
    let mut registry = OperatorRegistry::new();

    registry.register(OperatorEntry::new(
        crate::graph::READ_OPERATOR,
        "Reads a product from a file.",
        vec![
            ParameterSpec::required("file", "The file from which the product is read."),
            ParameterSpec::optional(
                "formatName",
                "Format of the input file. Inferred from the extension if omitted.",
                None,
            ),
            ParameterSpec::optional(
                "bandNames",
                "Comma-separated list of bands to read. All bands if omitted.",
                None,
            ),
        ],
        || Box::new(ReadOp::default()),
    ));

    registry.register(OperatorEntry::new(
        crate::graph::PRODUCT_SET_READER,
        "Reads a set of products; expanded into one Read node per file before execution.",
        vec![ParameterSpec::required(
            "fileList",
            "Comma-separated list of input files.",
        )],
        || Box::new(ProductSetReaderOp),
    ));

    registry.register(OperatorEntry::new(
        WRITE_OPERATOR,
        "Writes a product to a file.",
        vec![
            ParameterSpec::required("file", "The output file to which the product is written."),
            ParameterSpec::optional(
                "formatName",
                "Output format. Inferred from the extension if omitted.",
                None,
            ),
        ],
        || Box::new(WriteOp::default()),
    ));

    registry.register(OperatorEntry::new(
        "Image-Filter",
        "Applies a moving-window filter to every band.",
        vec![
            ParameterSpec::optional("filterType", "Mean or Median.", Some("Mean")),
            ParameterSpec::optional("filterSize", "Odd window size in pixels.", Some("3")),
        ],
        || Box::new(ImageFilterOp::default()),
    ));

    registry.register(OperatorEntry::new(
        "LinearToFromdB",
        "Converts bands between linear and dB scale.",
        vec![],
        || Box::new(LinearToFromDbOp::default()),
    ));

    registry.register(OperatorEntry::new(
        "Band-Arithmetic",
        "Combines matching bands of two source products.",
        vec![
            ParameterSpec::required(
                "operation",
                "sum, difference, ratio, normalized_diff or log_ratio.",
            ),
            ParameterSpec::optional("targetBand", "Name prefix of the output bands.", None),
        ],
        || Box::new(BandArithmeticOp::default()),
    ));

    registry.register(OperatorEntry::new(
        "Multilook",
        "Averages blocks of range and azimuth looks.",
        vec![
            ParameterSpec::optional("nRgLooks", "Number of range looks.", Some("1")),
            ParameterSpec::optional("nAzLooks", "Number of azimuth looks.", Some("1")),
        ],
        || Box::new(MultilookOp::default()),
    ));

    registry.register(OperatorEntry::new(
        "CreateStack",
        "Collocates the bands of all source products over their common extent.",
        vec![],
        || Box::new(CreateStackOp::default()),
    ));

    registry
}
