use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::*;
use std::process::Command;
use tempfile::tempdir;

/// Write a text model with one PINHOLE camera into `sparse`. Image `i` sees its own point
/// `100 + i` and the point 1000 every image shares.
fn write_model(sparse: &Path, names: &[&str]) -> std::io::Result<()> {
    fs::create_dir_all(sparse)?;
    fs::write(
        sparse.join("cameras.txt"),
        "# Camera list with one line of data per camera:\n\
         1 PINHOLE 640 480 500 500 320 240\n",
    )?;

    let mut images = String::from("# Image list with two lines of data per image:\n");
    let mut points = String::from("# 3D point list with one line of data per point:\n");
    let mut shared = String::from("1000 0 0 5 255 255 255 0.5");
    for (i, name) in names.iter().enumerate() {
        let id = i + 1;
        images.push_str(&format!(
            "{} 1 0 0 0 {} 0 0 1 {}\n10.5 20 {} 30 40.25 1000\n",
            id,
            i,
            name,
            100 + id
        ));
        points.push_str(&format!("{} {} 1 2 10 20 30 0.25 {} 0\n", 100 + id, i, id));
        shared.push_str(&format!(" {} 1", id));
    }
    points.push_str(&shared);
    points.push('\n');
    fs::write(sparse.join("images.txt"), images)?;
    fs::write(sparse.join("points3D.txt"), points)?;
    Ok(())
}

fn dataset(root: &Path, names: &[&str]) -> std::io::Result<()> {
    write_model(&root.join("sparse").join("0"), names)?;
    fs::create_dir_all(root.join("images"))?;
    for name in names {
        fs::write(root.join("images").join(name), name.as_bytes())?;
    }
    Ok(())
}

const RIG: [&str; 8] = [
    "000001_0.png",
    "000001_1.png",
    "000002_0.png",
    "000002_1.png",
    "000003_0.png",
    "000003_1.png",
    "000004_0.png",
    "000004_1.png",
];

#[test]
fn subsample_multi_lens() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let source = dir.path().join("source");
    let out = dir.path().join("out");
    dataset(&source, &RIG)?;

    let mut cmd = Command::cargo_bin("subsample")?;
    cmd.arg("-s").arg(&source).arg("-o").arg(&out).arg("-n").arg("2");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Total shots: 4"))
        .stdout(predicate::str::contains("Images per shot: 2"))
        .stdout(predicate::str::contains("Selected shots: 2"))
        .stdout(predicate::str::contains("Selected images: 4"));

    for kept in ["000001_0.png", "000001_1.png", "000003_0.png", "000003_1.png"].iter() {
        assert!(out.join("images").join(kept).is_file());
    }
    assert!(!out.join("images/000002_0.png").exists());
    assert!(out.join("sparse/0/images.txt").is_file());
    assert!(!out.join("sparse/0/points3D.ply").exists());

    let images = fs::read_to_string(out.join("sparse/0/images.txt"))?;
    assert!(images.contains("000003_1.png"));
    assert!(!images.contains("000004_0.png"));
    Ok(())
}

#[test]
fn subsample_offset_and_binary_output() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let source = dir.path().join("source");
    let out = dir.path().join("out");
    let names = ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg", "f.jpg"];
    dataset(&source, &names)?;

    let mut cmd = Command::cargo_bin("subsample")?;
    cmd.arg("--source")
        .arg(&source)
        .arg("--output")
        .arg(&out)
        .arg("--offset")
        .arg("1")
        .arg("--format")
        .arg("binary")
        .arg("--copy")
        .arg("--ply");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Selected images: 2"))
        .stdout(predicate::str::contains("binary model"));

    assert!(out.join("images/b.jpg").is_file());
    assert!(out.join("images/f.jpg").is_file());
    assert!(!out.join("images/a.jpg").exists());
    assert!(out.join("sparse/0/images.bin").is_file());
    assert!(out.join("sparse/0/points3D.ply").is_file());

    let mut info = Command::cargo_bin("colmap")?;
    info.arg("info").arg(&out);
    info.assert()
        .success()
        .stdout(predicate::str::contains(
            "COLMAP reconstruction with 1 cameras, 2 images, 3 points",
        ))
        .stdout(predicate::str::contains("binary"));
    Ok(())
}

#[test]
fn missing_image_fails_without_output() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let source = dir.path().join("source");
    let out = dir.path().join("out");
    dataset(&source, &RIG)?;
    fs::remove_file(source.join("images/000003_1.png"))?;

    let mut cmd = Command::cargo_bin("subsample")?;
    cmd.arg("-s").arg(&source).arg("-o").arg(&out).arg("-n").arg("2");
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("000003_1.png"));
    assert!(!out.join("sparse/0/images.txt").exists());
    Ok(())
}

#[test]
fn non_positive_stride_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let source = dir.path().join("source");
    let out = dir.path().join("out");
    dataset(&source, &RIG)?;

    for n in ["0", "-3"].iter() {
        let mut cmd = Command::cargo_bin("subsample")?;
        cmd.arg("-s").arg(&source).arg("-o").arg(&out).arg("-n").arg(n);
        cmd.assert()
            .failure()
            .code(2)
            .stderr(predicate::str::contains("keep-every"));
    }
    assert!(!out.exists());
    Ok(())
}

#[test]
fn rerun_into_same_output_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let source = dir.path().join("source");
    let out = dir.path().join("out");
    dataset(&source, &RIG)?;

    let mut cmd = Command::cargo_bin("subsample")?;
    cmd.arg("-s").arg(&source).arg("-o").arg(&out).arg("-n").arg("2");
    cmd.assert().success();

    let mut cmd = Command::cargo_bin("subsample")?;
    cmd.arg("-s")
        .arg(&source)
        .arg("-o")
        .arg(&out)
        .arg("-n")
        .arg("2")
        .arg("--offset")
        .arg("1")
        .arg("--format")
        .arg("binary");
    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("not an empty directory"));
    assert!(!out.join("images/000002_0.png").exists());
    assert!(!out.join("sparse/0/images.bin").exists());
    Ok(())
}

#[test]
fn missing_source() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let mut cmd = Command::cargo_bin("subsample")?;
    cmd.arg("-s")
        .arg(dir.path().join("nothing"))
        .arg("-o")
        .arg(dir.path().join("out"));
    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("does not exist"));
    Ok(())
}

#[test]
fn corrupt_model() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let source = dir.path().join("source");
    dataset(&source, &RIG)?;
    fs::write(
        source.join("sparse/0/cameras.txt"),
        "1 PINHOLE 640 480 500 500 320\n",
    )?;

    let mut cmd = Command::cargo_bin("subsample")?;
    cmd.arg("-s").arg(&source).arg("-o").arg(dir.path().join("out"));
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("corrupt cameras"));
    Ok(())
}

#[test]
fn sparse_without_numbered_model() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let source = dir.path().join("source");
    let out = dir.path().join("out");
    dataset(&source, &RIG)?;
    fs::rename(source.join("sparse/0"), source.join("model"))?;
    fs::remove_dir(source.join("sparse"))?;
    fs::rename(source.join("model"), source.join("sparse"))?;

    let mut cmd = Command::cargo_bin("subsample")?;
    cmd.arg("-s").arg(&source).arg("-o").arg(&out);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Selected shots: 1"));
    assert!(out.join("sparse/0/cameras.txt").is_file());
    Ok(())
}

#[test]
fn convert_and_ply() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let source = dir.path().join("source");
    let converted = dir.path().join("converted");
    dataset(&source, &RIG)?;

    let mut cmd = Command::cargo_bin("colmap")?;
    cmd.arg("convert").arg(&source).arg(&converted);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Converted text model to binary"));
    assert!(converted.join("points3D.bin").is_file());

    let mut info = Command::cargo_bin("colmap")?;
    info.arg("info").arg(&converted);
    info.assert()
        .success()
        .stdout(predicate::str::contains("8 images, 9 points"))
        .stdout(predicate::str::contains("PINHOLE: 1"))
        .stdout(predicate::str::contains("Total shots: 4"));

    let ply = dir.path().join("points.ply");
    let mut cmd = Command::cargo_bin("colmap")?;
    cmd.arg("ply").arg(&converted).arg(&ply);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Wrote 9 points"));
    assert!(ply.is_file());
    Ok(())
}
