//! Vertex/pixel shaders and fixed state for drawing textured quads.

use crate::{d3d11::D3DDevice, d3d11::to_rect, platform_error};
use screen_capture::{CaptureError, Color, LogicalSize, Rectangle, tessellation::Vertex};
use std::{ffi::c_void, mem, sync::OnceLock};
use windows::{
    Win32::Graphics::{
        Direct3D::{
            D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST, Fxc::D3DCompile, ID3DBlob,
        },
        Direct3D11::{
            D3D11_BIND_CONSTANT_BUFFER, D3D11_BIND_VERTEX_BUFFER, D3D11_BLEND_DESC,
            D3D11_BLEND_INV_SRC_ALPHA, D3D11_BLEND_ONE, D3D11_BLEND_OP_ADD,
            D3D11_BLEND_SRC_ALPHA, D3D11_BLEND_ZERO, D3D11_BUFFER_DESC,
            D3D11_COLOR_WRITE_ENABLE_ALL, D3D11_COMPARISON_NEVER, D3D11_CULL_NONE,
            D3D11_FILL_SOLID, D3D11_FILTER_MIN_MAG_MIP_LINEAR, D3D11_FLOAT32_MAX,
            D3D11_INPUT_ELEMENT_DESC, D3D11_INPUT_PER_VERTEX_DATA, D3D11_RASTERIZER_DESC,
            D3D11_RENDER_TARGET_BLEND_DESC, D3D11_SAMPLER_DESC, D3D11_SUBRESOURCE_DATA,
            D3D11_TEXTURE_ADDRESS_CLAMP, D3D11_USAGE_DEFAULT, D3D11_USAGE_IMMUTABLE,
            D3D11_VIEWPORT, ID3D11BlendState, ID3D11Buffer, ID3D11InputLayout,
            ID3D11PixelShader, ID3D11RasterizerState, ID3D11RenderTargetView,
            ID3D11SamplerState, ID3D11ShaderResourceView, ID3D11VertexShader,
        },
        Dxgi::Common::{DXGI_FORMAT_R32G32_FLOAT, DXGI_FORMAT_R32G32B32_FLOAT},
    },
    core::{PCSTR, s},
};

const HLSL_SOURCE: &str = include_str!("quad.hlsl");

struct Bytecode {
    vertex: Vec<u8>,
    texture: Vec<u8>,
    circle: Vec<u8>,
}

fn blob_bytes(blob: &ID3DBlob) -> Vec<u8> {
    unsafe {
        let ptr = blob.GetBufferPointer() as *const u8;
        std::slice::from_raw_parts(ptr, blob.GetBufferSize()).to_vec()
    }
}

fn compile(entry: PCSTR, target: PCSTR) -> Result<Vec<u8>, String> {
    let source = HLSL_SOURCE.as_bytes();
    let mut blob: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;

    let hr = unsafe {
        D3DCompile(
            source.as_ptr() as *const c_void,
            source.len(),
            None,
            None,
            None,
            entry,
            target,
            0,
            0,
            &mut blob,
            Some(&mut errors),
        )
    };

    if let Err(e) = hr {
        let message = errors
            .map(|b| String::from_utf8_lossy(&blob_bytes(&b)).to_string())
            .unwrap_or_default();
        return Err(format!("HLSL compile failed: {e} {message}"));
    }

    blob.map(|b| blob_bytes(&b))
        .ok_or_else(|| "D3DCompile returned no blob".to_string())
}

fn bytecode() -> Result<&'static Bytecode, CaptureError> {
    static BYTECODE: OnceLock<Result<Bytecode, String>> = OnceLock::new();
    BYTECODE
        .get_or_init(|| {
            Ok(Bytecode {
                vertex: compile(s!("VS"), s!("vs_4_0"))?,
                texture: compile(s!("PS"), s!("ps_4_0"))?,
                circle: compile(s!("PS_CIRCLE"), s!("ps_4_0"))?,
            })
        })
        .as_ref()
        .map_err(|e| CaptureError::Other(e.clone()))
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct CircleParams {
    color: [f32; 4],
}

/// What the pixel shader writes for each quad.
pub enum QuadFill<'a> {
    /// Sample a texture with straight-alpha blending.
    Texture {
        view: &'a ID3D11ShaderResourceView,
        blend: bool,
    },
    /// A soft-edged disc inscribed in the quad.
    Circle(Color),
}

pub struct QuadPipeline {
    device: D3DDevice,
    vertex_shader: ID3D11VertexShader,
    texture_shader: ID3D11PixelShader,
    circle_shader: ID3D11PixelShader,
    input_layout: ID3D11InputLayout,
    sampler: ID3D11SamplerState,
    blend: ID3D11BlendState,
    rasterizer: ID3D11RasterizerState,
    circle_params: ID3D11Buffer,
}

// SAFETY: only immutable state objects, used through the multithread
// protected context of `device`.
unsafe impl Send for QuadPipeline {}
unsafe impl Sync for QuadPipeline {}

impl QuadPipeline {
    pub fn new(device: &D3DDevice) -> Result<Self, CaptureError> {
        let code = bytecode()?;
        let d3d = &device.device;

        let mut vertex_shader: Option<ID3D11VertexShader> = None;
        unsafe { d3d.CreateVertexShader(&code.vertex, None, Some(&mut vertex_shader)) }
            .map_err(|e| platform_error(e, "CreateVertexShader failed"))?;

        let mut texture_shader: Option<ID3D11PixelShader> = None;
        unsafe { d3d.CreatePixelShader(&code.texture, None, Some(&mut texture_shader)) }
            .map_err(|e| platform_error(e, "CreatePixelShader (texture) failed"))?;

        let mut circle_shader: Option<ID3D11PixelShader> = None;
        unsafe { d3d.CreatePixelShader(&code.circle, None, Some(&mut circle_shader)) }
            .map_err(|e| platform_error(e, "CreatePixelShader (circle) failed"))?;

        let layout = [
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("POSITION"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32B32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 0,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("TEXCOORD"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 12,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
        ];
        let mut input_layout: Option<ID3D11InputLayout> = None;
        unsafe { d3d.CreateInputLayout(&layout, &code.vertex, Some(&mut input_layout)) }
            .map_err(|e| platform_error(e, "CreateInputLayout failed"))?;

        let sampler_desc = D3D11_SAMPLER_DESC {
            Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
            AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
            ComparisonFunc: D3D11_COMPARISON_NEVER,
            MinLOD: 0.0,
            MaxLOD: D3D11_FLOAT32_MAX,
            ..Default::default()
        };
        let mut sampler: Option<ID3D11SamplerState> = None;
        unsafe { d3d.CreateSamplerState(&sampler_desc, Some(&mut sampler)) }
            .map_err(|e| platform_error(e, "CreateSamplerState failed"))?;

        let mut blend_desc = D3D11_BLEND_DESC::default();
        blend_desc.RenderTarget[0] = D3D11_RENDER_TARGET_BLEND_DESC {
            BlendEnable: true.into(),
            SrcBlend: D3D11_BLEND_SRC_ALPHA,
            DestBlend: D3D11_BLEND_INV_SRC_ALPHA,
            BlendOp: D3D11_BLEND_OP_ADD,
            SrcBlendAlpha: D3D11_BLEND_ONE,
            DestBlendAlpha: D3D11_BLEND_ZERO,
            BlendOpAlpha: D3D11_BLEND_OP_ADD,
            RenderTargetWriteMask: D3D11_COLOR_WRITE_ENABLE_ALL.0 as u8,
        };
        let mut blend: Option<ID3D11BlendState> = None;
        unsafe { d3d.CreateBlendState(&blend_desc, Some(&mut blend)) }
            .map_err(|e| platform_error(e, "CreateBlendState failed"))?;

        let rasterizer_desc = D3D11_RASTERIZER_DESC {
            FillMode: D3D11_FILL_SOLID,
            CullMode: D3D11_CULL_NONE,
            ScissorEnable: true.into(),
            DepthClipEnable: true.into(),
            ..Default::default()
        };
        let mut rasterizer: Option<ID3D11RasterizerState> = None;
        unsafe { d3d.CreateRasterizerState(&rasterizer_desc, Some(&mut rasterizer)) }
            .map_err(|e| platform_error(e, "CreateRasterizerState failed"))?;

        let params_desc = D3D11_BUFFER_DESC {
            ByteWidth: mem::size_of::<CircleParams>().next_multiple_of(16) as u32,
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_CONSTANT_BUFFER.0 as u32,
            ..Default::default()
        };
        let mut circle_params: Option<ID3D11Buffer> = None;
        unsafe { d3d.CreateBuffer(&params_desc, None, Some(&mut circle_params)) }
            .map_err(|e| platform_error(e, "CreateBuffer (circle params) failed"))?;

        let missing = |what: &str| CaptureError::Other(format!("{what} returned None"));
        Ok(Self {
            device: device.clone(),
            vertex_shader: vertex_shader.ok_or_else(|| missing("CreateVertexShader"))?,
            texture_shader: texture_shader.ok_or_else(|| missing("CreatePixelShader"))?,
            circle_shader: circle_shader.ok_or_else(|| missing("CreatePixelShader"))?,
            input_layout: input_layout.ok_or_else(|| missing("CreateInputLayout"))?,
            sampler: sampler.ok_or_else(|| missing("CreateSamplerState"))?,
            blend: blend.ok_or_else(|| missing("CreateBlendState"))?,
            rasterizer: rasterizer.ok_or_else(|| missing("CreateRasterizerState"))?,
            circle_params: circle_params.ok_or_else(|| missing("CreateBuffer"))?,
        })
    }

    fn vertex_buffer(&self, vertices: &[Vertex]) -> Result<ID3D11Buffer, CaptureError> {
        let desc = D3D11_BUFFER_DESC {
            ByteWidth: mem::size_of_val(vertices) as u32,
            Usage: D3D11_USAGE_IMMUTABLE,
            BindFlags: D3D11_BIND_VERTEX_BUFFER.0 as u32,
            ..Default::default()
        };
        let data = D3D11_SUBRESOURCE_DATA {
            pSysMem: vertices.as_ptr() as *const c_void,
            ..Default::default()
        };

        let mut buffer: Option<ID3D11Buffer> = None;
        unsafe {
            self.device
                .device
                .CreateBuffer(&desc, Some(&data), Some(&mut buffer))
        }
        .map_err(|e| platform_error(e, "CreateBuffer (vertices) failed"))?;
        buffer.ok_or_else(|| CaptureError::Other("CreateBuffer returned None".to_string()))
    }

    /// Draw `vertices` (whole quads) into `target`, clipped to `scissor`.
    pub fn draw(
        &self,
        target: &ID3D11RenderTargetView,
        target_size: LogicalSize,
        scissor: Rectangle,
        vertices: &[Vertex],
        fill: QuadFill<'_>,
    ) -> Result<(), CaptureError> {
        if vertices.is_empty() {
            return Ok(());
        }

        let buffer = self.vertex_buffer(vertices)?;
        let stride = mem::size_of::<Vertex>() as u32;
        let offset = 0u32;
        let viewport = D3D11_VIEWPORT {
            TopLeftX: 0.0,
            TopLeftY: 0.0,
            Width: target_size.width as f32,
            Height: target_size.height as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        let context = &self.device.context;

        unsafe {
            context.OMSetRenderTargets(Some(&[Some(target.clone())]), None);
            context.RSSetViewports(Some(&[viewport]));
            context.RSSetState(&self.rasterizer);
            context.RSSetScissorRects(Some(&[to_rect(scissor)]));
            context.IASetInputLayout(&self.input_layout);
            context.IASetPrimitiveTopology(D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            context.IASetVertexBuffers(
                0,
                1,
                Some(&Some(buffer) as *const _),
                Some(&stride as *const _),
                Some(&offset as *const _),
            );
            context.VSSetShader(&self.vertex_shader, None);

            match fill {
                QuadFill::Texture { view, blend } => {
                    if blend {
                        context.OMSetBlendState(&self.blend, None, 0xFFFF_FFFF);
                    } else {
                        context.OMSetBlendState(None::<&ID3D11BlendState>, None, 0xFFFF_FFFF);
                    }
                    context.PSSetShader(&self.texture_shader, None);
                    context.PSSetShaderResources(0, Some(&[Some(view.clone())]));
                    context.PSSetSamplers(0, Some(&[Some(self.sampler.clone())]));
                }
                QuadFill::Circle(color) => {
                    let params = CircleParams {
                        color: color.to_array(),
                    };
                    context.UpdateSubresource(
                        &self.circle_params,
                        0,
                        None,
                        &params as *const CircleParams as *const c_void,
                        0,
                        0,
                    );
                    context.OMSetBlendState(&self.blend, None, 0xFFFF_FFFF);
                    context.PSSetShader(&self.circle_shader, None);
                    context.PSSetConstantBuffers(0, Some(&[Some(self.circle_params.clone())]));
                }
            }

            context.Draw(vertices.len() as u32, 0);

            context.PSSetShaderResources(0, Some(&[None]));
            context.OMSetRenderTargets(None, None);
        }

        Ok(())
    }
}
