//! Mirrors `original_source/mato/tests/08_mato_config`: reads a var:val
//! file from disk and checks the missing-key-returns-default contract
//! across all three typed getters, using the same key names the original
//! test prints (`abc`/`def` strings, `ghi`/`jkl` ints, `mno`/`pqr`
//! doubles, `this_is_one`/`this_is_zero` as a present-vs-absent int pair).

use mato_config::VarValConfig;

#[test]
fn reads_present_keys_and_falls_back_on_absent_ones() {
    let dir = std::env::temp_dir().join(format!("mato_config_test_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config_test.cfg");
    std::fs::write(
        &path,
        "abc: hello\n# a comment line\nmno: 3.25\nthis_is_one: 1\n",
    )
    .unwrap();

    let cfg = VarValConfig::read(&path).unwrap();
    assert_eq!(cfg.get_str("abc", "xx"), "hello");
    assert_eq!(cfg.get_str("def", "xx"), "xx");
    assert_eq!(cfg.get_i64("ghi", 777), 777);
    assert_eq!(cfg.get_i64("jkl", 999), 999);
    assert_eq!(cfg.get_f64("mno", 777.999), 3.25);
    assert_eq!(cfg.get_f64("pqr", 999.777), 999.777);
    assert_eq!(cfg.get_i64("this_is_one", 999), 1);
    assert_eq!(cfg.get_i64("this_is_zero", 999), 999);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn missing_file_yields_empty_config_not_an_error() {
    let cfg = VarValConfig::read("/nonexistent/path/to/config.cfg").unwrap();
    assert_eq!(cfg.get_str("anything", "fallback"), "fallback");
}
