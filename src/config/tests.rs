use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_cover_the_whole_surface() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(
        settings.server.graceful_shutdown,
        Duration::from_secs(DEFAULT_GRACEFUL_SHUTDOWN_SECS)
    );
    assert_eq!(settings.cache.root_dir, PathBuf::from(DEFAULT_CACHE_ROOT));
    assert_eq!(settings.cache.article_prefix, DEFAULT_ARTICLE_PREFIX);
    assert_eq!(settings.cache.article_suffix, DEFAULT_ARTICLE_SUFFIX);
    assert_eq!(
        settings.guard.forbidden_extensions,
        vec![".jsp".to_string(), ".properties".to_string()]
    );
    assert_eq!(
        settings.origin.timeout,
        Duration::from_secs(DEFAULT_ORIGIN_TIMEOUT_SECS)
    );
    assert!(settings.origin.host.is_none());
    assert!(settings.origin.context_path.is_empty());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_port_is_rejected() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "server.port", .. })
    ));
}

#[test]
fn zero_origin_timeout_is_rejected() {
    let mut raw = RawSettings::default();
    raw.origin.timeout_seconds = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "origin.timeout_seconds",
            ..
        })
    ));
}

#[test]
fn forbidden_extensions_must_be_dot_prefixed() {
    let mut raw = RawSettings::default();
    raw.guard.forbidden_extensions = Some(vec!["jsp".to_string()]);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "guard.forbidden_extensions",
            ..
        })
    ));
}

#[test]
fn context_path_trailing_slash_is_rejected() {
    let mut raw = RawSettings::default();
    raw.origin.context_path = Some("/app/".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "origin.context_path",
            ..
        })
    ));
}

#[test]
fn blank_origin_host_is_normalized_to_none() {
    let mut raw = RawSettings::default();
    raw.origin.host = Some("   ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.origin.host.is_none());
}

#[test]
fn serve_flags_parse() {
    let args = CliArgs::parse_from([
        "facciata",
        "serve",
        "--server-port",
        "8088",
        "--cache-root-dir",
        "/srv/pages",
        "--origin-host",
        "renderer.internal:9000",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_port, Some(8088));
            assert_eq!(
                serve.overrides.cache_root_dir,
                Some(PathBuf::from("/srv/pages"))
            );
            assert_eq!(
                serve.overrides.origin_host,
                Some("renderer.internal:9000".to_string())
            );
        }
    }
}
