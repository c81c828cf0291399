//! Board operations and the `get_board_info` layout.

use serde::Serialize;

/// Commit pending acquisition values to the DSP.
pub const OP_APPLY: &str = "apply";
/// Read the 26-byte board information block.
pub const OP_GET_BOARD_INFO: &str = "get_board_info";
/// Number of peaking times each FiPPI supports.
pub const OP_GET_NUMBER_PT_PER_FIPPI: &str = "get_number_pt_per_fippi";
/// Peaking times of the current parameter set.
pub const OP_GET_CURRENT_PEAKING_TIMES: &str = "get_current_peaking_times";

/// Size of the buffer `get_board_info` writes.
pub const BOARD_INFO_LEN: usize = 26;

/// Field names of the decoded board information bytes, in order.
pub const BOARD_INFO_FIELDS: [&str; 20] = [
    "PIC Code Variant",
    "PIC Code Major Version",
    "PIC Code Minor Version",
    "DSP Code Variant",
    "DSP Code Major Version",
    "DSP Code Minor Version",
    "DSP Clock Speed",
    "Clock Enable Register",
    "Number of FiPPIs",
    "Gain Mode",
    "Gain (mantissa low byte)",
    "Gain (mantissa high byte)",
    "Gain (exponent)",
    "Nyquist Filter",
    "ADC Speed Grade",
    "FPGA Speed",
    "Analog Power Supply",
    "FiPPI 0 Decimation",
    "FiPPI 0 Version",
    "FiPPI 0 Variant",
];

/// Board identification returned by `get_board_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardInfo {
    raw: Vec<u8>,
}

impl BoardInfo {
    /// Wrap the raw block read from the board.
    pub fn from_bytes(raw: [u8; BOARD_INFO_LEN]) -> Self {
        Self { raw: raw.to_vec() }
    }

    /// The undecoded block.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Named fields in board order, each byte read as a signed `char`.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, i8)> + '_ {
        BOARD_INFO_FIELDS
            .iter()
            .copied()
            .zip(self.raw.iter().map(|&b| i8::from_ne_bytes([b])))
    }

    /// Look up a field by its name.
    pub fn field(&self, name: &str) -> Option<i8> {
        self.fields().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// PIC firmware `variant.major.minor`.
    pub fn pic_version(&self) -> (u8, u8, u8) {
        (self.raw[0], self.raw[1], self.raw[2])
    }

    /// DSP code `variant.major.minor`.
    pub fn dsp_version(&self) -> (u8, u8, u8) {
        (self.raw[3], self.raw[4], self.raw[5])
    }

    /// DSP clock speed in MHz.
    pub fn dsp_clock_mhz(&self) -> u8 {
        self.raw[6]
    }

    /// Number of FiPPIs on the board.
    pub fn number_of_fippis(&self) -> u8 {
        self.raw[8]
    }

    /// Named fields as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .fields()
            .map(|(name, value)| (name.to_string(), value.into()))
            .collect();
        serde_json::Value::Object(map)
    }
}
