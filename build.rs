use std::{
    collections::BTreeMap,
    io::{BufWriter, Write},
};

fn main() {
    generate_configs();
}

fn generate_configs() {
    #[derive(Debug, Clone, Copy)]
    struct ConfigValue {
        value: usize,
        comment: &'static str,
    }

    const CONFIGS: &[(&str, ConfigValue)] = &[
        ("CHUNK_SIZE", ConfigValue {
            value: 1 << 12,
            comment: "The minimal amount of bytes the heap grows by.",
        }),
        ("LINEAR_LIMIT", ConfigValue {
            value: 128,
            comment: "Block sizes up to this bound get one bucket per 8-byte step.",
        }),
        ("BUCKET_COUNT", ConfigValue {
            value: 24,
            comment: "The number of free-list buckets; the last one is a catch-all.",
        }),
    ];

    let mut configs = CONFIGS.iter().copied().collect::<BTreeMap<_, _>>();

    for (name, _) in CONFIGS {
        println!("cargo:rerun-if-env-changed=SF_{name}");
    }
    for (env, value) in std::env::vars() {
        if let Some(name) = env.strip_prefix("SF_")
            && let Some(slot) = configs.get_mut(name)
            && let Ok(value) = value.parse::<usize>()
        {
            slot.value = value;
        }
    }

    let output_dir = std::env::var("OUT_DIR").unwrap();
    let file = std::fs::File::create(format!("{output_dir}/config.rs")).unwrap();
    let mut file = BufWriter::new(file);

    for (name, config) in configs {
        writeln!(
            &mut file,
            "#[doc = \"{}\"] pub const {name}: usize = {};",
            config.comment, config.value
        )
        .unwrap();
    }
}
