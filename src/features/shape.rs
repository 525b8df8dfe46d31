use crate::regions::RegionProperties;

pub const NUM_SHAPE_FEATURES: usize = 12;

pub const SHAPE_FEATURE_NAMES: [&str; NUM_SHAPE_FEATURES] = [
    "area",
    "convex_area",
    "eccentricity",
    "equivalent_diameter",
    "euler_number",
    "extent",
    "filled_area",
    "major_axis_length",
    "minor_axis_length",
    "orientation",
    "perimeter",
    "solidity",
];

pub fn shape_features(region: &RegionProperties) -> [f64; NUM_SHAPE_FEATURES] {
    [
        region.area,
        region.convex_area,
        region.eccentricity,
        region.equivalent_diameter,
        region.euler_number,
        region.extent,
        region.filled_area,
        region.major_axis_length,
        region.minor_axis_length,
        region.orientation,
        region.perimeter,
        region.solidity,
    ]
}
