//! Canned H-file images used across the endpoint suites.

use super::hfile::*;

/// The standard sample file:
///
/// ```text
/// /
/// ├── array_1d        f64 [100], v = i as f64
/// ├── plane           f64 [6, 8], v = r*10 + c, NaN at [0][0]
/// ├── matrix_3d       i32 [10, 20, 30], v = linear index
/// ├── chunked_2d      i32 [100, 80] in 32x32 chunks, gzip+shuffle+fletcher32
/// ├── text_1d         |S8 [4]
/// ├── complex_1d      complex128 [3]
/// ├── empty_1d        f64 [0]
/// ├── scalar          f64 rank-0, v = 42.5
/// ├── flagged         u8 [4] with 12 attributes (one unreadable)
/// └── grp/
///     └── inner/
///         └── deep    f64 [5]
/// ```
pub fn sample_file() -> Vec<u8> {
    let mut b = HFileBuilder::new();

    let array_1d: Vec<f64> = (0..100).map(f64::from).collect();
    let array_1d = b.contiguous_dataset(
        DT_F64,
        &[100],
        &f64_bytes(&array_1d),
        &[("unit", Attr::Str("mV")), ("rate", Attr::Float(44.1))],
    );

    let mut plane: Vec<f64> = Vec::with_capacity(48);
    for r in 0..6 {
        for c in 0..8 {
            plane.push(f64::from(r * 10 + c));
        }
    }
    plane[0] = f64::NAN;
    let plane = b.contiguous_dataset(DT_F64, &[6, 8], &f64_bytes(&plane), &[]);

    let matrix: Vec<i32> = (0..10 * 20 * 30).collect();
    let matrix_3d = b.contiguous_dataset(DT_I32, &[10, 20, 30], &i32_bytes(&matrix), &[]);

    let chunked: Vec<i32> = (0..100 * 80).collect();
    let chunked_2d = b.chunked_dataset(
        DT_I32,
        &[100, 80],
        &[32, 32],
        &[(FILTER_SHUFFLE, 0), (FILTER_GZIP, 6), (FILTER_FLETCHER32, 0)],
        &i32_bytes(&chunked),
        &[("source", Attr::Str("sensor-7"))],
    );

    let text_1d = b.contiguous_dataset(
        (CLASS_STRING, 8, 0),
        &[4],
        &fixed_str_bytes(&["alpha", "beta", "gamma", "delta"], 8),
        &[],
    );

    let complex_1d = b.contiguous_dataset(
        DT_C128,
        &[3],
        &complex128_bytes(&[(1.0, 2.0), (0.5, -1.0), (3.0, 0.0)]),
        &[],
    );

    let empty_1d = b.contiguous_dataset(DT_F64, &[0], &[], &[]);

    let scalar = b.contiguous_dataset(DT_F64, &[], &f64_bytes(&[42.5]), &[]);

    let flagged_attrs: Vec<(String, i64)> =
        (0..11).map(|i| (format!("attr_{i:02}"), i)).collect();
    let mut attrs: Vec<(&str, Attr)> =
        flagged_attrs.iter().map(|(name, v)| (name.as_str(), Attr::Int(*v))).collect();
    attrs.push(("broken", Attr::Unknown));
    let flagged = b.contiguous_dataset(DT_U8, &[4], &[1, 2, 3, 4], &attrs);

    let deep: Vec<f64> = (0..5).map(f64::from).collect();
    let deep = b.contiguous_dataset(DT_F64, &[5], &f64_bytes(&deep), &[]);
    let inner = b.group(&[], &[("deep", deep)]);
    let grp = b.group(&[("purpose", Attr::Str("nesting"))], &[("inner", inner)]);

    let root = b.group(
        &[],
        &[
            ("array_1d", array_1d),
            ("plane", plane),
            ("matrix_3d", matrix_3d),
            ("chunked_2d", chunked_2d),
            ("text_1d", text_1d),
            ("complex_1d", complex_1d),
            ("empty_1d", empty_1d),
            ("scalar", scalar),
            ("flagged", flagged),
            ("grp", grp),
        ],
    );
    b.finish(root)
}

/// Line-mode fixtures: `big_1d` u8 [5_000_000] and `long_1d` u8 [2_000_000].
pub fn line_file() -> Vec<u8> {
    let mut b = HFileBuilder::new();
    let big: Vec<u8> = (0..5_000_000usize).map(|i| (i % 256) as u8).collect();
    let big_1d = b.contiguous_dataset(DT_U8, &[5_000_000], &big, &[]);
    let long: Vec<u8> = (0..2_000_000usize).map(|i| (i % 256) as u8).collect();
    let long_1d = b.contiguous_dataset(DT_U8, &[2_000_000], &long, &[]);
    let root = b.group(&[], &[("big_1d", big_1d), ("long_1d", long_1d)]);
    b.finish(root)
}

/// Heatmap fixture: `big_plane` u8 [5000, 5000], v = (r*5000 + c) % 256.
pub fn heatmap_file() -> Vec<u8> {
    let mut b = HFileBuilder::new();
    let plane: Vec<u8> = (0..5000usize * 5000).map(|i| (i % 256) as u8).collect();
    let big_plane = b.contiguous_dataset(DT_U8, &[5000, 5000], &plane, &[]);
    let root = b.group(&[], &[("big_plane", big_plane)]);
    b.finish(root)
}
