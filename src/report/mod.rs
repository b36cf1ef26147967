pub mod json;
pub mod junit;

pub use json::{
    report_file_name, save_report, AssertionEntry, FlowData, FlowOutput, JsonReport,
    ReportSummary,
};
pub use junit::generate_junit_xml;
