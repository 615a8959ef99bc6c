//! Candidate source columns for every normalized field.
//!
//! The first name in each list is the canonical one, which is also the name
//! positional sources declare. The remaining names cover header drift across
//! the herb and disease sheets, including Thai headers that were saved as
//! UTF-8 and reopened as windows-1252.

use crate::source::RawRow;

/// A logical input field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    HerbName,
    ScientificName,
    HerbDescription,
    Properties,
    HerbUsage,
    DiseaseName,
    EngName,
    Symptoms,
    SubSymptoms,
    Locations,
    Cause,
    Treatment,
}

/// `field -> ordered candidate column names`.
pub static FIELD_TABLE: &[(Field, &[&str])] = &[
    (
        Field::HerbName,
        &[
            "name",
            "Name",
            "herbName",
            "ชื่อสมุนไพร",
            "ชื่อ",
            "à¸Šà¸·à¹ˆà¸\u{ad}à¸ªà¸¡à¸¸à¸™à¹„à¸žà¸£",
        ],
    ),
    (
        Field::ScientificName,
        &[
            "scientificName",
            "Scientific Name",
            "scientific_name",
            "ชื่อวิทยาศาสตร์",
            "à¸Šà¸·à¹ˆà¸\u{ad}à¸§à¸´à¸—à¸¢à¸²à¸¨à¸²à¸ªà¸•à¸£à¹Œ",
        ],
    ),
    (
        Field::HerbDescription,
        &[
            "description",
            "Description",
            "รายละเอียด",
            "à¸£à¸²à¸¢à¸¥à¸°à¹€à¸\u{ad}à¸µà¸¢à¸”",
        ],
    ),
    (
        Field::Properties,
        &[
            "properties",
            "Properties",
            "สรรพคุณ",
            "à¸ªà¸£à¸£à¸žà¸„à¸¸à¸“",
        ],
    ),
    (
        Field::HerbUsage,
        &["usage", "Usage", "วิธีใช้", "à¸§à¸´à¸˜à¸µà¹ƒà¸Šà¹‰"],
    ),
    (
        Field::DiseaseName,
        &[
            "name",
            "Name",
            "รายชื่อโรค",
            "ชื่อโรค",
            "à¸£à¸²à¸¢à¸Šà¸·à¹ˆà¸\u{ad}à¹‚à¸£à¸„",
        ],
    ),
    (
        Field::EngName,
        &["engName", "English Name", "ชื่อภาษาอังกฤษ"],
    ),
    (
        Field::Symptoms,
        &[
            "symptoms",
            "Symptoms",
            "อาการหลัก",
            "à¸\u{ad}à¸²à¸\u{81}à¸²à¸£à¸«à¸¥à¸±à¸\u{81}",
        ],
    ),
    (
        Field::SubSymptoms,
        &[
            "subSymptoms",
            "Sub Symptoms",
            "อาการรอง",
            "à¸\u{ad}à¸²à¸\u{81}à¸²à¸£à¸£à¸\u{ad}à¸‡",
        ],
    ),
    (
        Field::Locations,
        &[
            "locations",
            "Locations",
            "ตำแหน่งที่พบบ่อย",
            "à¸•à¸³à¹\u{81}à¸«à¸™à¹ˆà¸‡à¸—à¸µà¹ˆà¸žà¸šà¸šà¹ˆà¸\u{ad}à¸¢",
        ],
    ),
    (
        Field::Cause,
        &["cause", "Cause", "สาเหตุ", "à¸ªà¸²à¹€à¸«à¸•à¸¸"],
    ),
    (
        Field::Treatment,
        &[
            "treatment",
            "Treatment",
            "วิธีรักษาเบื้องต้น",
            "วิธีรักษาเบื้อต้น",
            "à¸§à¸´à¸˜à¸µà¸£à¸±à¸\u{81}à¸©à¸²à¹€à¸šà¸·à¹‰à¸\u{ad}à¸‡à¸•à¹‰à¸™",
            "à¸§à¸´à¸˜à¸µà¸£à¸±à¸\u{81}à¸©à¸²à¹€à¸šà¸·à¹‰à¸\u{ad}à¸•à¹‰à¸™",
        ],
    ),
];

/// Candidate column names for a field, canonical name first.
pub fn candidates(field: Field) -> &'static [&'static str] {
    FIELD_TABLE
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, names)| *names)
        .unwrap_or(&[])
}

/// First candidate column whose trimmed value is non-empty.
pub fn resolve(row: &RawRow, field: Field) -> Option<&str> {
    candidates(field)
        .iter()
        .filter_map(|name| row.get(name))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// Canonical column name of a field.
pub fn canonical(field: Field) -> &'static str {
    candidates(field).first().copied().unwrap_or("")
}
