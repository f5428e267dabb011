use super::{BlockContext, ConsensusRule, RuleId};
use crate::{
    error::{ConsensusError, EngineError},
    protocol::{threshold_state, DeploymentFlags, LockFlags, ScriptFlags},
};

/// Resolves which rules are in force at this height, from fixed activation
/// heights and the version bits state at the parent. Later rules read the
/// result off the context.
pub struct DeploymentActivation;

impl ConsensusRule for DeploymentActivation {
    fn id(&self) -> RuleId {
        RuleId::DeploymentActivation
    }

    fn execute(&self, ctx: &mut BlockContext<'_>) -> Result<(), EngineError> {
        let height = ctx.height();
        let network = ctx.network;

        let mut flags = DeploymentFlags::default();

        // duplicate txid protection is not tied to a deployment
        flags.bip30 = true;
        flags.bip34 = height >= network.bip34_height;

        if height >= network.p2sh_height {
            flags.script |= ScriptFlags::VERIFY_P2SH;
        }
        if height >= network.bip66_height {
            flags.script |= ScriptFlags::VERIFY_DERSIG;
        }
        if height >= network.bip65_height {
            flags.script |= ScriptFlags::VERIFY_CHECKLOCKTIMEVERIFY;
        }

        let mut version_bits = ctx.version_bits.write();
        for (name, deployment) in network.deployments.iter() {
            let entry = threshold_state(
                ctx.chain,
                &mut *version_bits,
                network,
                &ctx.prev,
                deployment,
            )
            .ok_or(EngineError::IncompleteChain(ctx.prev.hash))?;

            if !entry.state.is_active() {
                continue;
            }

            match *name {
                "csv" => {
                    flags.lock |= LockFlags::VERIFY_SEQUENCE | LockFlags::MEDIAN_TIME_PAST;
                    flags.script |= ScriptFlags::VERIFY_CHECKSEQUENCEVERIFY;
                }
                "segwit" => {
                    flags.script |= ScriptFlags::VERIFY_WITNESS | ScriptFlags::VERIFY_NULLDUMMY;
                }
                _ => {}
            }
        }
        drop(version_bits);

        ctx.flags = flags;

        Ok(())
    }
}

/// Rejects block versions that were voted obsolete by the fixed height
/// upgrades.
pub struct HeaderVersion;

impl ConsensusRule for HeaderVersion {
    fn id(&self) -> RuleId {
        RuleId::HeaderVersion
    }

    fn execute(&self, ctx: &mut BlockContext<'_>) -> Result<(), EngineError> {
        let version = ctx.block.header.version.to_consensus();
        let height = ctx.height();
        let network = ctx.network;

        let obsolete = (version < 2 && height >= network.bip34_height)
            || (version < 3 && height >= network.bip66_height)
            || (version < 4 && height >= network.bip65_height);

        if obsolete {
            return Err(ConsensusError::ObsoleteVersion { version, height }.into());
        }

        Ok(())
    }
}
