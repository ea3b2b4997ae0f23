use anyhow::{Context, Result};
use argh::FromArgs;

use gfx::{
    BootstrapConfig, CapabilityRequirement, Feature, Graphics, InstanceConfig, QueueRole,
    SearchPolicy,
};

fn main() -> Result<()> {
    let app: App = argh::from_env();
    app.run()
}

/// Vulkan device negotiation probe
#[derive(FromArgs)]
struct App {
    /// pick a random suitable device instead of the best one
    #[argh(switch)]
    random: bool,

    /// seed for the random device choice
    #[argh(option)]
    seed: Option<u64>,

    /// feature which must be supported, e.g. `Vulkan12Features::timeline_semaphore`
    #[argh(option)]
    require_feature: Vec<Feature>,

    /// feature which is enabled when supported
    #[argh(option)]
    optional_feature: Vec<Feature>,

    /// device extension which must be supported
    #[argh(option)]
    require_extension: Vec<String>,

    /// device extension which is enabled when supported
    #[argh(option)]
    optional_extension: Vec<String>,

    /// number of dedicated compute queues
    #[argh(option, default = "1")]
    compute_queues: u32,

    /// number of dedicated transfer queues
    #[argh(option, default = "1")]
    transfer_queues: u32,

    /// disable Vulkan validation layer
    #[argh(switch)]
    no_validation: bool,
}

impl App {
    pub fn run(self) -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(tracing::Level::INFO.into())
                    .from_env_lossy(),
            )
            .init();

        Graphics::set_init_config(InstanceConfig {
            app_name: env!("CARGO_BIN_NAME").into(),
            app_version: (0, 1, 0),
            validation_layer_enabled: !self.no_validation,
            presentation_enabled: false,
        });
        let graphics = Graphics::get_or_init().context("failed to create Vulkan instance")?;

        let config = self.bootstrap_config();
        let bootstrapped = unsafe { gfx::bootstrap(graphics, &config) }
            .context("failed to bootstrap a logical device")?;

        let device = &bootstrapped.device;
        let properties = &device.properties().v1_0;
        tracing::info!(
            name = %properties.device_name,
            ty = ?properties.device_type,
            api_version = %gfx::ApiVersion(properties.api_version),
            "device ready",
        );

        let capabilities = device.capabilities();
        for extension in &capabilities.enabled_extensions {
            tracing::info!(%extension, "enabled extension");
        }
        for feature in capabilities.enabled_features.iter() {
            tracing::info!(%feature, "enabled feature");
        }

        for assignment in bootstrapped.plan.assignments() {
            for (n, id) in assignment.queue_ids().enumerate() {
                let queue = bootstrapped
                    .role_queue(&assignment.role, n)
                    .with_context(|| format!("queue {n} of role {} is missing", assignment.role))?;
                tracing::info!(
                    role = %assignment.role,
                    family = id.family,
                    index = id.index,
                    handle = ?queue.handle(),
                    "queue",
                );
            }
        }

        device.wait_idle().context("failed to wait for the device")?;
        Ok(())
    }

    fn bootstrap_config(&self) -> BootstrapConfig {
        let policy = match (self.random, self.seed) {
            (_, Some(seed)) => SearchPolicy::Random { seed },
            (true, None) => SearchPolicy::random(),
            (false, None) => SearchPolicy::Best,
        };

        let mut requirement = CapabilityRequirement::new()
            .require_features(&self.require_feature)
            .request_features(&self.optional_feature);
        for name in &self.require_extension {
            requirement = requirement.require_extension(name.as_str());
        }
        for name in &self.optional_extension {
            requirement = requirement.request_extension(name.as_str());
        }

        let mut config = BootstrapConfig::headless_compute()
            .with_policy(policy)
            .with_requirement(&requirement);
        config.roles = vec![QueueRole::graphics_compute(1)];
        if self.compute_queues > 0 {
            config.roles.push(QueueRole::compute(self.compute_queues));
        }
        if self.transfer_queues > 0 {
            config.roles.push(QueueRole::transfer(self.transfer_queues));
        }
        config
    }
}
