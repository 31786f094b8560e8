use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use ndarray::Array2;
use tempfile::TempDir;

use sargraph::io::dimap::DimapReader;
use sargraph::io::geotiff::{read_geotiff, write_geotiff};
use sargraph::io::ProductReader;
use sargraph::{BandInfo, Product, ProductInfo};

fn sargraph(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sargraph"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("failed to launch sargraph")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn input(dir: &Path, name: &str, width: usize, height: usize, value: f32) -> PathBuf {
    let product = Product {
        info: ProductInfo::new(name, width, height, vec![BandInfo::new("Amplitude_VV")]),
        bands: vec![Array2::from_elem((height, width), value)],
    };
    let path = dir.join(name);
    write_geotiff(&product, &path).unwrap();
    path
}

fn workspace() -> TempDir {
    tempfile::tempdir().unwrap()
}

#[test]
fn test_unknown_parameter_fails_without_output() {
    let dir = workspace();
    input(dir.path(), "in.tif", 8, 8, 1.0);

    let out = sargraph(
        dir.path(),
        &["Image-Filter", "-PfilterSise=5", "-x", "out.tif", "in.tif"],
    );
    assert!(!out.status.success());
    assert!(stderr(&out).contains("filterSise"), "{}", stderr(&out));
    assert!(stderr(&out).contains("-PfilterSize"));
    assert!(!dir.path().join("out.tif").exists());
}

#[test]
fn test_unknown_operator_is_usage_error() {
    let dir = workspace();
    let out = sargraph(dir.path(), &["No-Such-Op", "in.tif"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("Unknown operator"));
}

#[test]
fn test_single_operator_writes_target() {
    let dir = workspace();
    input(dir.path(), "in.tif", 9, 6, 4.0);

    let out = sargraph(
        dir.path(),
        &["Image-Filter", "-PfilterSize=3", "-q", "2", "-x", "filtered.tif", "in.tif"],
    );
    assert!(out.status.success(), "{}", stderr(&out));

    let product = read_geotiff(&dir.path().join("filtered.tif")).unwrap();
    assert_eq!((product.info.width, product.info.height), (9, 6));
    assert!(product.bands[0].iter().all(|&v| (v - 4.0).abs() < 1e-6));
}

#[test]
fn test_default_target_is_dimap() {
    let dir = workspace();
    input(dir.path(), "in.tif", 5, 5, 100.0);

    let out = sargraph(dir.path(), &["LinearToFromdB", "in.tif"]);
    assert!(out.status.success(), "{}", stderr(&out));

    let reader = DimapReader::open(&dir.path().join("target.dim")).unwrap();
    assert_eq!(reader.info().bands[0].name, "Amplitude_VV_db");
    assert!(dir.path().join("target.data").is_dir());
}

#[test]
fn test_missing_source_file_fails() {
    let dir = workspace();
    let out = sargraph(dir.path(), &["Image-Filter", "-x", "out.tif", "absent.tif"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("absent.tif"), "{}", stderr(&out));
    assert!(!dir.path().join("out.tif").exists());
}

const CHAIN: &str = r#"<graph id="Graph">
  <version>1.0</version>
  <node id="Read">
    <operator>Read</operator>
    <parameters>
      <file>${input}</file>
    </parameters>
  </node>
  <node id="Filter">
    <operator>Image-Filter</operator>
    <sources>
      <sourceProduct refid="Read"/>
    </sources>
    <parameters>
      <filterSize>${size}</filterSize>
    </parameters>
  </node>
  <node id="Save">
    <operator>Write</operator>
    <sources>
      <sourceProduct refid="Filter"/>
    </sources>
    <parameters>
      <file>${output}</file>
    </parameters>
  </node>
</graph>
"#;

#[test]
fn test_graph_ending_in_write_gets_no_extra_write() {
    let dir = workspace();
    input(dir.path(), "in.tif", 6, 6, 2.0);
    fs::write(dir.path().join("chain.xml"), CHAIN).unwrap();
    fs::write(dir.path().join("params.properties"), "size=3\noutput=from-file.tif\n").unwrap();

    let out = sargraph(
        dir.path(),
        &[
            "chain.xml",
            "-t",
            "params.properties",
            "-Pinput=in.tif",
            "-Poutput=chain.tif",
        ],
    );
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(dir.path().join("chain.tif").exists());
    assert!(!dir.path().join("from-file.tif").exists());
    assert!(!dir.path().join("target.dim").exists());
}

#[test]
fn test_graph_sources_and_write_are_wired() {
    let dir = workspace();
    input(dir.path(), "in.tif", 6, 4, 10.0);
    let graph = r#"<graph id="g">
  <node id="toDb">
    <operator>LinearToFromdB</operator>
    <sources>
      <sourceProduct refid="sourceProduct"/>
    </sources>
  </node>
</graph>"#;
    fs::write(dir.path().join("db.xml"), graph).unwrap();

    let out = sargraph(dir.path(), &["db.xml", "-x", "db.tif", "in.tif"]);
    assert!(out.status.success(), "{}", stderr(&out));

    let product = read_geotiff(&dir.path().join("db.tif")).unwrap();
    assert!(product.bands[0].iter().all(|&v| (v - 10.0).abs() < 1e-4));
}

#[test]
fn test_product_set_from_positional_sources() {
    let dir = workspace();
    input(dir.path(), "a.tif", 4, 4, 1.0);
    input(dir.path(), "b.tif", 4, 4, 2.0);
    let graph = r#"<graph id="g">
  <node id="set">
    <operator>ProductSet-Reader</operator>
    <parameters>
      <fileList>${sourceProducts}</fileList>
    </parameters>
  </node>
  <node id="stack">
    <operator>CreateStack</operator>
    <sources>
      <sourceProduct refid="set"/>
    </sources>
  </node>
</graph>"#;
    fs::write(dir.path().join("stack.xml"), graph).unwrap();

    let out = sargraph(
        dir.path(),
        &["stack.xml", "-x", "stack.tif", "a.tif", "b.tif"],
    );
    assert!(out.status.success(), "{}", stderr(&out));

    let product = read_geotiff(&dir.path().join("stack.tif")).unwrap();
    assert_eq!(product.bands.len(), 2);
    assert!(product.bands[1].iter().all(|&v| v == 2.0));
}

#[test]
fn test_operator_help_exits_zero() {
    let dir = workspace();
    let out = sargraph(dir.path(), &["-h", "Multilook"]);
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("-PnRgLooks"));
    assert!(text.contains("-PnAzLooks"));
}

#[test]
fn test_error_chain_with_e() {
    let dir = workspace();
    input(dir.path(), "a.tif", 4, 4, 1.0);
    input(dir.path(), "b.tif", 5, 4, 1.0);

    let out = sargraph(
        dir.path(),
        &["Band-Arithmetic", "-Poperation=ratio", "-e", "-x", "r.tif", "a.tif", "b.tif"],
    );
    assert!(!out.status.success());
    let err = stderr(&out);
    assert!(err.contains("Band-Arithmetic"), "{err}");
    assert!(err.contains("caused by"), "{err}");
    assert!(!dir.path().join("r.tif").exists());
}
