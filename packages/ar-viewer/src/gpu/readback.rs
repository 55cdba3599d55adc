//! Texture to CPU copies.
//!
//! The map callback fires from `device.poll` on native and from the browser's
//! event loop on wasm. [`MapFuture`] bridges both to an `await`.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::error::GpuError;
use crate::gpu::driver::PixelBuffer;

const BYTES_PER_PIXEL: u32 = 4;

/// Row pitch of a copy, padded to `COPY_BYTES_PER_ROW_ALIGNMENT`.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * BYTES_PER_PIXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded + (align - unpadded % align) % align
}

/// Drop row padding from a mapped copy. Rows keep their order.
pub fn unpad_rows(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let padded = padded_bytes_per_row(width) as usize;
    let row = (width * BYTES_PER_PIXEL) as usize;
    let mut out = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * padded;
        out.extend_from_slice(&data[start..start + row]);
    }
    out
}

#[derive(Default)]
struct MapState {
    result: Option<Result<(), wgpu::BufferAsyncError>>,
    waker: Option<Waker>,
}

/// Resolves when a `map_async` callback has fired.
pub struct MapFuture {
    state: Arc<Mutex<MapState>>,
}

impl MapFuture {
    pub fn new(slice: wgpu::BufferSlice<'_>, mode: wgpu::MapMode) -> Self {
        let state = Arc::new(Mutex::new(MapState::default()));
        let shared = Arc::clone(&state);
        slice.map_async(mode, move |result| {
            let mut state = match shared.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            state.result = Some(result);
            if let Some(waker) = state.waker.take() {
                waker.wake();
            }
        });
        Self { state }
    }
}

impl Future for MapFuture {
    type Output = Result<(), wgpu::BufferAsyncError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match state.result.take() {
            Some(result) => Poll::Ready(result),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

/// A submitted texture copy waiting for its map callback.
///
/// Owns the staging buffer and nothing else, so awaiting it keeps no borrow
/// of the device or the renderer.
pub struct PendingReadback {
    buffer: wgpu::Buffer,
    map: MapFuture,
    width: u32,
    height: u32,
    bottom_first: bool,
}

impl Future for PendingReadback {
    type Output = Result<PixelBuffer, GpuError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.map).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(GpuError::Readback(e.to_string()))),
            Poll::Ready(Ok(())) => {
                let data = {
                    let view = self.buffer.slice(..).get_mapped_range();
                    unpad_rows(&view, self.width, self.height)
                };
                self.buffer.unmap();
                let mut pixels = PixelBuffer::new(self.width, self.height, data);
                if self.bottom_first {
                    pixels.flip_rows();
                }
                Poll::Ready(Ok(pixels))
            }
        }
    }
}

/// Copy an RGBA8 texture into a staging buffer and start mapping it.
/// `bottom_first` flips the rows once the copy lands.
pub fn start_readback(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    bottom_first: bool,
) -> PendingReadback {
    let size = texture.size();
    let (width, height) = (size.width, size.height);
    let padded = padded_bytes_per_row(width);

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Buffer"),
        size: (padded * height) as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &buffer,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        size,
    );
    queue.submit(Some(encoder.finish()));

    let map = MapFuture::new(buffer.slice(..), wgpu::MapMode::Read);
    // No-op on the web, where the browser resolves the map.
    device.poll(wgpu::Maintain::Wait);

    PendingReadback {
        buffer,
        map,
        width,
        height,
        bottom_first,
    }
}

/// Read an RGBA8 texture. Rows come back top first, as stored on the GPU.
pub async fn read_texture_rgba(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
) -> Result<Vec<u8>, GpuError> {
    Ok(start_readback(device, queue, texture, false).await?.data)
}
