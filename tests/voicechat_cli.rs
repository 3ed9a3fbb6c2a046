use std::process::Command;

fn combined_output(output: &std::process::Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn voicechat_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_voicechat").expect("voicechat test binary not built")
}

#[test]
fn help_mentions_barge_in() {
    let output = Command::new(voicechat_bin())
        .arg("--help")
        .output()
        .expect("run voicechat --help");
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("barge-in"));
    assert!(combined.contains("--whisper-model-path"));
}

#[test]
fn list_input_devices_prints_something() {
    // Headless machines may have no devices or no audio host at all; either
    // way the flag must produce a recognizable message.
    let output = Command::new(voicechat_bin())
        .arg("--list-input-devices")
        .output()
        .expect("run voicechat --list-input-devices");
    let combined = combined_output(&output);
    assert!(
        output.status.success()
            || combined.contains("failed to enumerate input devices"),
        "unexpected output: {combined}"
    );
}

#[test]
fn invalid_flag_value_fails_validation() {
    let output = Command::new(voicechat_bin())
        .args(["--tts-volume", "2.5"])
        .output()
        .expect("run voicechat with bad volume");
    assert!(!output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("--tts-volume"));
}

#[test]
fn missing_whisper_model_is_fatal() {
    let output = Command::new(voicechat_bin())
        .args(["--whisper-model-path", "/no/such/model.bin"])
        .output()
        .expect("run voicechat with missing model");
    assert!(!output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("does not exist"));
}
