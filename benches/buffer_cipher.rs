use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use infoprotect::prelude::*;
use infoprotect::protection::{AesCryptoProvider, ContentKey, CryptoProvider};
use std::sync::Arc;

fn create_test_data(size_kb: usize) -> Vec<u8> {
    (0..size_kb * 1024).map(|i| (i % 251) as u8).collect()
}

// Whole-buffer encryption per cipher mode
fn bench_encrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("encrypt");
    let key = ContentKey::generate();

    for mode in [CipherMode::Cbc4k, CipherMode::Ecb] {
        let provider = AesCryptoProvider::new(&key, mode).expect("Failed to create provider");
        for size_kb in [4, 64, 1024].iter() {
            let data = create_test_data(*size_kb);
            let mut output = vec![0u8; provider.protected_content_length(data.len() as u64, true) as usize];
            group.throughput(Throughput::Bytes((size_kb * 1024) as u64));
            group.bench_with_input(
                BenchmarkId::new(mode.as_str(), size_kb),
                size_kb,
                |b, _| {
                    b.iter(|| {
                        provider
                            .encrypt(0, black_box(&data), &mut output, true)
                            .expect("Failed to encrypt")
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_decrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("decrypt");
    let provider =
        AesCryptoProvider::new(&ContentKey::generate(), CipherMode::Cbc4k).expect("Failed to create provider");

    for size_kb in [4, 64, 1024].iter() {
        let data = create_test_data(*size_kb);
        let mut ciphertext = vec![0u8; provider.protected_content_length(data.len() as u64, true) as usize];
        let written = provider
            .encrypt(0, &data, &mut ciphertext, true)
            .expect("Failed to encrypt");
        ciphertext.truncate(written);
        let mut output = vec![0u8; ciphertext.len()];

        group.throughput(Throughput::Bytes((size_kb * 1024) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size_kb), size_kb, |b, _| {
            b.iter(|| {
                provider
                    .decrypt(0, black_box(&ciphertext), &mut output, true)
                    .expect("Failed to decrypt")
            });
        });
    }

    group.finish();
}

// Publishing includes license encoding and key wrapping
fn bench_publish(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let configuration = MipConfiguration::builder(
        ApplicationInfo::new("bench-app", "Buffer Cipher Bench", "1.0"),
        dir.path(),
    )
    .build()
    .expect("Failed to build configuration");
    let context = MipContext::create(Arc::new(configuration)).expect("Failed to create context");
    let profile = ProtectionProfile::load(ProtectionProfileSettings::new(
        context,
        CacheStorageType::InMemory,
        Arc::new(FixedConsentDelegate(Consent::AcceptAlways)),
    ))
    .expect("Failed to load profile");
    let engine = profile
        .add_engine(
            ProtectionEngineSettings::new(Identity::new("alice@contoso.com"))
                .auth_delegate(Arc::new(StaticTokenAuthDelegate::new("bench-token"))),
        )
        .expect("Failed to add engine");
    let descriptor = ProtectionDescriptorBuilder::from_user_rights(vec![UserRights::new(
        ["bob@contoso.com"],
        ["VIEW"],
    )])
    .build()
    .expect("Failed to build descriptor");

    let mut group = c.benchmark_group("publish");
    for (name, json) in [("xml", false), ("json", true)] {
        let settings = PublishingSettings::new(descriptor.clone()).json_format(json);
        group.bench_function(name, |b| {
            b.iter(|| {
                engine
                    .create_protection_handler_for_publishing(black_box(&settings))
                    .expect("Failed to publish")
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encrypt, bench_decrypt, bench_publish);
criterion_main!(benches);
