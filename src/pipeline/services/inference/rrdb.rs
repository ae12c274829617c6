//! Residual-in-residual dense block generator (ESRGAN).
//!
//! Parameter names follow the published `RRDB_ESRGAN_x4` state dict, so the
//! original PyTorch checkpoint loads without renaming.

use candle_core::{Module, Result, Tensor};
use candle_nn::{conv2d, ops::leaky_relu, Conv2d, Conv2dConfig, VarBuilder};

const NEGATIVE_SLOPE: f64 = 0.2;
const RESIDUAL_SCALE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RrdbConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub features: usize,
    pub blocks: usize,
    pub growth: usize,
}

impl RrdbConfig {
    /// Two nearest-neighbour x2 stages.
    pub const SCALE: u32 = 4;

    pub const fn esrgan_x4() -> Self {
        Self {
            in_channels: 3,
            out_channels: 3,
            features: 64,
            blocks: 23,
            growth: 32,
        }
    }
}

impl Default for RrdbConfig {
    fn default() -> Self {
        Self::esrgan_x4()
    }
}

fn conv3x3(in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Conv2d> {
    let config = Conv2dConfig {
        padding: 1,
        ..Default::default()
    };
    conv2d(in_channels, out_channels, 3, config, vb)
}

struct ResidualDenseBlock {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    conv4: Conv2d,
    conv5: Conv2d,
}

impl ResidualDenseBlock {
    fn load(vb: VarBuilder, features: usize, growth: usize) -> Result<Self> {
        Ok(Self {
            conv1: conv3x3(features, growth, vb.pp("conv1"))?,
            conv2: conv3x3(features + growth, growth, vb.pp("conv2"))?,
            conv3: conv3x3(features + 2 * growth, growth, vb.pp("conv3"))?,
            conv4: conv3x3(features + 3 * growth, growth, vb.pp("conv4"))?,
            conv5: conv3x3(features + 4 * growth, features, vb.pp("conv5"))?,
        })
    }
}

impl Module for ResidualDenseBlock {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let x1 = leaky_relu(&self.conv1.forward(xs)?, NEGATIVE_SLOPE)?;
        let x2 = leaky_relu(&self.conv2.forward(&Tensor::cat(&[xs, &x1], 1)?)?, NEGATIVE_SLOPE)?;
        let x3 = leaky_relu(
            &self.conv3.forward(&Tensor::cat(&[xs, &x1, &x2], 1)?)?,
            NEGATIVE_SLOPE,
        )?;
        let x4 = leaky_relu(
            &self.conv4.forward(&Tensor::cat(&[xs, &x1, &x2, &x3], 1)?)?,
            NEGATIVE_SLOPE,
        )?;
        let x5 = self.conv5.forward(&Tensor::cat(&[xs, &x1, &x2, &x3, &x4], 1)?)?;
        x5.affine(RESIDUAL_SCALE, 0.0)?.add(xs)
    }
}

struct Rrdb {
    rdb1: ResidualDenseBlock,
    rdb2: ResidualDenseBlock,
    rdb3: ResidualDenseBlock,
}

impl Rrdb {
    fn load(vb: VarBuilder, features: usize, growth: usize) -> Result<Self> {
        Ok(Self {
            rdb1: ResidualDenseBlock::load(vb.pp("RDB1"), features, growth)?,
            rdb2: ResidualDenseBlock::load(vb.pp("RDB2"), features, growth)?,
            rdb3: ResidualDenseBlock::load(vb.pp("RDB3"), features, growth)?,
        })
    }
}

impl Module for Rrdb {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let out = self.rdb1.forward(xs)?;
        let out = self.rdb2.forward(&out)?;
        let out = self.rdb3.forward(&out)?;
        out.affine(RESIDUAL_SCALE, 0.0)?.add(xs)
    }
}

pub struct RrdbNet {
    conv_first: Conv2d,
    trunk: Vec<Rrdb>,
    trunk_conv: Conv2d,
    upconv1: Conv2d,
    upconv2: Conv2d,
    hr_conv: Conv2d,
    conv_last: Conv2d,
    config: RrdbConfig,
}

impl RrdbNet {
    /// Fails on a missing tensor or a shape mismatch.
    pub fn load(vb: VarBuilder, config: RrdbConfig) -> Result<Self> {
        let RrdbConfig {
            in_channels,
            out_channels,
            features,
            blocks,
            growth,
        } = config;

        let trunk_vb = vb.pp("RRDB_trunk");
        let trunk = (0..blocks)
            .map(|index| Rrdb::load(trunk_vb.pp(index.to_string()), features, growth))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            conv_first: conv3x3(in_channels, features, vb.pp("conv_first"))?,
            trunk,
            trunk_conv: conv3x3(features, features, vb.pp("trunk_conv"))?,
            upconv1: conv3x3(features, features, vb.pp("upconv1"))?,
            upconv2: conv3x3(features, features, vb.pp("upconv2"))?,
            hr_conv: conv3x3(features, features, vb.pp("HRconv"))?,
            conv_last: conv3x3(features, out_channels, vb.pp("conv_last"))?,
            config,
        })
    }

    pub fn config(&self) -> RrdbConfig {
        self.config
    }

    fn upsample(xs: &Tensor, conv: &Conv2d) -> Result<Tensor> {
        let (_, _, height, width) = xs.dims4()?;
        let upscaled = xs.upsample_nearest2d(height * 2, width * 2)?;
        leaky_relu(&conv.forward(&upscaled)?, NEGATIVE_SLOPE)
    }
}

impl Module for RrdbNet {
    /// `(N, in, H, W)` to `(N, out, 4H, 4W)`.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let features = self.conv_first.forward(xs)?;
        let mut trunk = features.clone();
        for block in &self.trunk {
            trunk = block.forward(&trunk)?;
        }
        let features = features.add(&self.trunk_conv.forward(&trunk)?)?;

        let features = Self::upsample(&features, &self.upconv1)?;
        let features = Self::upsample(&features, &self.upconv2)?;
        let hr = leaky_relu(&self.hr_conv.forward(&features)?, NEGATIVE_SLOPE)?;
        self.conv_last.forward(&hr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::services::inference::test_support::tiny_config;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn published_hyperparameters() {
        let config = RrdbConfig::esrgan_x4();
        assert_eq!(
            (config.in_channels, config.out_channels, config.features, config.blocks, config.growth),
            (3, 3, 64, 23, 32)
        );
        assert_eq!(RrdbConfig::SCALE, 4);
    }

    #[test]
    fn forward_scales_spatial_dims_by_four() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let net = RrdbNet::load(vb, tiny_config()).unwrap();

        let input = Tensor::rand(0f32, 1f32, (1, 3, 5, 6), &Device::Cpu).unwrap();
        let output = net.forward(&input).unwrap();
        assert_eq!(output.dims4().unwrap(), (1, 3, 20, 24));
    }

    #[test]
    fn parameter_names_follow_the_checkpoint_layout() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        RrdbNet::load(vb, tiny_config()).unwrap();

        let data = varmap.data().lock().unwrap();
        for name in [
            "conv_first.weight",
            "RRDB_trunk.0.RDB1.conv1.weight",
            "RRDB_trunk.1.RDB3.conv5.bias",
            "trunk_conv.weight",
            "upconv1.weight",
            "upconv2.weight",
            "HRconv.weight",
            "conv_last.bias",
        ] {
            assert!(data.contains_key(name), "missing {name}");
        }
        assert_eq!(
            data["RRDB_trunk.0.RDB1.conv5.weight"].dims(),
            &[8, 8 + 4 * 4, 3, 3]
        );
    }
}
