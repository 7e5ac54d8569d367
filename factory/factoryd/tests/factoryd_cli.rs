use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

use assert_cmd::Command;
use tempfile::tempdir;

const TEMPLATE: &str = "0x7777777777777777777777777777777777777777777777777777777777777777";

fn factoryd(state: &Path, key: &Path) -> Command {
    let mut cmd = Command::cargo_bin("factoryd").expect("factoryd binary");
    cmd.env("FACTORY_STATE", state).env("FACTORY_KEY", key);
    cmd
}

fn stdout_line(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8_lossy(&output).trim().to_string()
}

#[test]
fn create_lands_at_predicted_address() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let state = temp.path().join("factory.log");
    let key = temp.path().join("owner.key");
    let organizer = temp.path().join("organizer.key");

    let owner_addr = stdout_line(factoryd(&state, &key).arg("keygen").arg("--out").arg(&key));
    let organizer_addr = stdout_line(
        factoryd(&state, &organizer)
            .arg("keygen")
            .arg("--out")
            .arg(&organizer),
    );
    assert_eq!(stdout_line(factoryd(&state, &key).arg("whoami")), owner_addr);

    factoryd(&state, &key)
        .args(["deploy", "--template", TEMPLATE])
        .assert()
        .success();

    let predicted = stdout_line(factoryd(&state, &key).args(["predict", "--id", "1"]));
    assert_eq!(
        stdout_line(factoryd(&state, &key).args(["predict", "--id", "1"])),
        predicted
    );
    assert_ne!(
        stdout_line(factoryd(&state, &key).args(["predict", "--id", "2"])),
        predicted
    );

    let created = stdout_line(factoryd(&state, &key).args([
        "create",
        "--id",
        "1",
        "--name",
        "Test Event",
        "--symbol",
        "TEST",
        "--category",
        "General",
        "--category",
        "VIP",
        "--base-uri",
        "https://example.com/api/token/",
        "--contract-uri",
        "https://example.com/api/contract/",
        "--owner",
        organizer_addr.as_str(),
    ]));
    assert_eq!(created, predicted);

    assert_eq!(
        stdout_line(factoryd(&state, &key).args(["address-of", "--id", "1"])),
        predicted
    );
    assert_eq!(stdout_line(factoryd(&state, &key).arg("count")), "1");
    assert_eq!(
        stdout_line(factoryd(&state, &key).args(["at", "--index", "0"])),
        predicted
    );
    assert_eq!(
        stdout_line(factoryd(&state, &key).args(["address-of", "--id", "2"])),
        "absent"
    );
    Ok(())
}

#[test]
fn rejected_commands_are_not_logged() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let state = temp.path().join("factory.log");
    let key = temp.path().join("owner.key");
    let stranger = temp.path().join("stranger.key");

    let owner_addr = stdout_line(factoryd(&state, &key).arg("keygen").arg("--out").arg(&key));
    factoryd(&state, &stranger)
        .arg("keygen")
        .arg("--out")
        .arg(&stranger)
        .assert()
        .success();
    factoryd(&state, &key)
        .args(["deploy", "--template", TEMPLATE])
        .assert()
        .success();

    let create = |signer: &Path| {
        let mut cmd = factoryd(&state, signer);
        cmd.args([
            "create", "--id", "1", "--name", "Event", "--symbol", "EV", "--owner", owner_addr.as_str(),
        ]);
        cmd
    };

    create(&stranger).assert().failure();
    create(&key).assert().success();
    create(&key).assert().failure();
    factoryd(&state, &key)
        .args(["deploy", "--template", TEMPLATE])
        .assert()
        .failure();

    let log = std::fs::read_to_string(&state)?;
    assert_eq!(log.lines().count(), 2);
    assert_eq!(stdout_line(factoryd(&state, &key).arg("count")), "1");
    factoryd(&state, &key)
        .args(["at", "--index", "1"])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn template_update_and_event_listing() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let state = temp.path().join("factory.log");
    let key = temp.path().join("owner.key");
    let replacement = "0x8888888888888888888888888888888888888888888888888888888888888888";

    factoryd(&state, &key)
        .arg("keygen")
        .arg("--out")
        .arg(&key)
        .assert()
        .success();
    factoryd(&state, &key)
        .args(["deploy", "--template", TEMPLATE])
        .assert()
        .success();
    assert_eq!(stdout_line(factoryd(&state, &key).arg("template")), TEMPLATE);

    let zero = "0".repeat(64);
    factoryd(&state, &key)
        .args(["set-template", "--template", zero.as_str()])
        .assert()
        .failure();
    factoryd(&state, &key)
        .args(["set-template", "--template", replacement])
        .assert()
        .success();
    assert_eq!(stdout_line(factoryd(&state, &key).arg("template")), replacement);

    let listing = stdout_line(factoryd(&state, &key).args(["events", "--checkpoint", "2"]));
    assert!(listing.contains("kind=OwnershipTransferred"), "{listing}");
    assert_eq!(listing.matches("kind=TemplateUpdated").count(), 2, "{listing}");
    assert!(listing.contains("checkpoint length=2"), "{listing}");
    Ok(())
}

#[test]
fn queries_require_a_deployed_factory() {
    let temp = tempdir().unwrap();
    let state = temp.path().join("factory.log");
    let key = temp.path().join("owner.key");
    factoryd(&state, &key).arg("count").assert().failure();
}

#[test]
fn concurrent_creates_for_one_id_append_once() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let state = temp.path().join("factory.log");
    let key = temp.path().join("owner.key");

    let owner_addr = stdout_line(factoryd(&state, &key).arg("keygen").arg("--out").arg(&key));
    factoryd(&state, &key)
        .args(["deploy", "--template", TEMPLATE])
        .assert()
        .success();

    let contenders = 4;
    let barrier = Arc::new(Barrier::new(contenders));
    let handles: Vec<_> = (0..contenders)
        .map(|n| {
            let state = state.clone();
            let key = key.clone();
            let owner = owner_addr.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let name = format!("Contender {n}");
                let mut cmd = factoryd(&state, &key);
                cmd.args([
                    "create",
                    "--id",
                    "1",
                    "--name",
                    name.as_str(),
                    "--symbol",
                    "RACE",
                    "--owner",
                    owner.as_str(),
                ]);
                barrier.wait();
                cmd.output().map(|out| out.status.success())
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.join().expect("create thread")? {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let log = std::fs::read_to_string(&state)?;
    assert_eq!(log.lines().count(), 2);
    assert_eq!(stdout_line(factoryd(&state, &key).arg("count")), "1");
    assert_ne!(
        stdout_line(factoryd(&state, &key).args(["address-of", "--id", "1"])),
        "absent"
    );
    Ok(())
}
